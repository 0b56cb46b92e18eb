//! Queue agent: the HTTP face of the queue authority
//!
//! Runs next to MPD and exposes the two operations the engine relies on:
//! a read of the current head and advance-and-prime.
//!
//! Advance-and-prime is three MPD commands (delete, play, stop) and is not
//! atomic to readers; a `now-playing` read in between can see the gap. The
//! agent only guarantees that two advances never interleave.

pub mod mpd;
pub mod routes;

use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::authority::{AdvanceOutcome, NowPlaying};
use crate::config::AgentConfig;
use mpd::{MpdClient, MpdConnection, MpdError};

pub use routes::{router, AgentState};

#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Mpd(#[from] MpdError),
}

pub struct QueueAgent {
    mpd: MpdClient,
    prime_delay: Duration,
    art_base_url: Option<String>,
    /// Serializes advance-and-prime across requests
    mutation: Mutex<()>,
}

impl QueueAgent {
    pub fn new(mpd: MpdClient, prime_delay: Duration, art_base_url: Option<String>) -> Self {
        Self {
            mpd,
            prime_delay,
            art_base_url: art_base_url.map(|u| u.trim_end_matches('/').to_string()),
            mutation: Mutex::new(()),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            MpdClient::from_config(&config.mpd),
            Duration::from_millis(config.prime_delay_ms),
            config.art_base_url.clone(),
        )
    }

    pub fn mpd_addr(&self) -> &str {
        self.mpd.addr()
    }

    /// Current head; `None` when MPD has no current song
    pub async fn now_playing(&self) -> Result<Option<NowPlaying>, AgentError> {
        let mut conn = self.mpd.connect().await?;
        self.snapshot(&mut conn).await
    }

    /// Remove the entry at `queue_position` if it still holds `track_id`,
    /// then play and stop so MPD selects a new current song.
    ///
    /// A mismatch or an out-of-range position skips the delete and only
    /// primes, which makes repeated calls for the same slot harmless.
    pub async fn advance(
        &self,
        queue_position: u32,
        track_id: Option<&str>,
    ) -> Result<AdvanceOutcome, AgentError> {
        let mutation_guard = self.mutation.lock().await;

        let mut conn = self.mpd.connect().await?;
        let entry = conn.playlist_item(queue_position).await?;
        let matches = match (&entry, track_id) {
            (Some(_), None) => true,
            (Some(song), Some(expected)) => song.file == expected,
            (None, _) => false,
        };

        if matches {
            conn.delete(queue_position).await?;
            info!(
                queue_position,
                file = entry.as_ref().map(|s| s.file.as_str()).unwrap_or_default(),
                "Removed queue entry"
            );
        } else {
            debug!(
                queue_position,
                expected = ?track_id,
                found = ?entry.as_ref().map(|s| s.file.as_str()),
                "Queue entry does not match, priming only"
            );
        }

        conn.play().await?;
        tokio::time::sleep(self.prime_delay).await;
        conn.stop().await?;

        let now_playing = self.snapshot(&mut conn).await?;
        drop(mutation_guard);

        Ok(AdvanceOutcome {
            primed_only: !matches,
            now_playing,
        })
    }

    async fn snapshot(&self, conn: &mut MpdConnection) -> Result<Option<NowPlaying>, AgentError> {
        let Some(song) = conn.current_song().await? else {
            return Ok(None);
        };
        let status = conn.status().await?;
        Ok(Some(NowPlaying {
            art_url: self.art_url(&song.file),
            queue_position: song.pos.or(status.song),
            title: song.title.unwrap_or_default(),
            artist: song.artist.unwrap_or_default(),
            album: song.album.unwrap_or_default(),
            elapsed: status.elapsed.unwrap_or(0.0),
            duration: status.duration.or(song.duration).unwrap_or(0.0),
            track_id: song.file,
        }))
    }

    fn art_url(&self, file: &str) -> Option<String> {
        if file.starts_with("http://") || file.starts_with("https://") {
            return None;
        }
        self.art_base_url
            .as_ref()
            .map(|base| format!("{}/coverart.php/{}", base, urlencoding::encode(file)))
    }
}
