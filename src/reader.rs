//! Stabilized snapshot reads
//!
//! MPD-side advance is two steps (delete the head, then force re-selection)
//! and is not atomic from the outside, so a single read can land in the gap
//! and report an empty head. Reading twice with short settle delays trades a
//! few hundred milliseconds for far fewer false "nothing next" results.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::authority::{NowPlaying, QueueAuthority};
use crate::config::ReaderConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderTiming {
    /// Wait before the first read
    pub first_settle: Duration,
    /// Wait between first and second read (shorter)
    pub second_settle: Duration,
}

impl ReaderTiming {
    /// No waiting; used by tests and tools
    pub const IMMEDIATE: ReaderTiming = ReaderTiming {
        first_settle: Duration::ZERO,
        second_settle: Duration::ZERO,
    };
}

impl From<&ReaderConfig> for ReaderTiming {
    fn from(config: &ReaderConfig) -> Self {
        Self {
            first_settle: Duration::from_millis(config.first_settle_ms),
            second_settle: Duration::from_millis(config.second_settle_ms),
        }
    }
}

/// Double-reading view of the queue authority's head.
///
/// Never mutates; safe to call repeatedly and concurrently.
#[derive(Clone)]
pub struct StabilizedReader {
    authority: Arc<dyn QueueAuthority>,
    timing: ReaderTiming,
}

impl StabilizedReader {
    pub fn new(authority: Arc<dyn QueueAuthority>, timing: ReaderTiming) -> Self {
        Self { authority, timing }
    }

    pub fn timing(&self) -> ReaderTiming {
        self.timing
    }

    /// Settle, read, settle again, read again. Prefers the second read when
    /// it found a head, otherwise the first, otherwise `None`.
    pub async fn read_stable(&self) -> Option<NowPlaying> {
        sleep(self.timing.first_settle).await;
        let first = self.read_once("first").await;

        sleep(self.timing.second_settle).await;
        let second = self.read_once("second").await;

        match (first, second) {
            (_, Some(second)) => Some(second),
            (Some(first), None) => {
                debug!(
                    track_id = %first.track_id,
                    "Second read empty, using first read"
                );
                Some(first)
            }
            (None, None) => None,
        }
    }

    async fn read_once(&self, attempt: &'static str) -> Option<NowPlaying> {
        match self.authority.now_playing().await {
            Ok(Some(snapshot)) if snapshot.has_head() => Some(snapshot),
            Ok(_) => {
                debug!(attempt, "Snapshot read found no head");
                None
            }
            Err(e) => {
                warn!(attempt, error = %e, "Snapshot read failed");
                None
            }
        }
    }
}
