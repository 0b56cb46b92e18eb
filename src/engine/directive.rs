//! Playback directives returned to the player

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::authority::NowPlaying;
use crate::token::{encode, PlaybackToken, TrackRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayBehavior {
    /// Start a new session, discarding the player's queue
    ReplaceAll,
    /// Append; accepted only if the player's current token matches
    /// `expectedPreviousToken`
    Enqueue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Directive {
    #[serde(rename = "AudioPlayer.Play")]
    Play {
        #[serde(rename = "playBehavior")]
        play_behavior: PlayBehavior,
        #[serde(rename = "audioItem")]
        audio_item: AudioItem,
    },
    #[serde(rename = "AudioPlayer.Stop")]
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioItem {
    pub stream: Stream,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub token: String,
    pub url: String,
    #[serde(rename = "offsetInMilliseconds")]
    pub offset_in_milliseconds: u64,
    #[serde(
        rename = "expectedPreviousToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub expected_previous_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subtitle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub art: Option<Art>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Art {
    pub sources: Vec<ArtSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtSource {
    pub url: String,
}

impl Directive {
    pub fn play_behavior(&self) -> Option<PlayBehavior> {
        match self {
            Directive::Play { play_behavior, .. } => Some(*play_behavior),
            Directive::Stop => None,
        }
    }

    pub fn stream(&self) -> Option<&Stream> {
        match self {
            Directive::Play { audio_item, .. } => Some(&audio_item.stream),
            Directive::Stop => None,
        }
    }

    pub fn is_enqueue(&self) -> bool {
        self.play_behavior() == Some(PlayBehavior::Enqueue)
    }

    pub fn is_replace_all(&self) -> bool {
        self.play_behavior() == Some(PlayBehavior::ReplaceAll)
    }
}

/// Builds Play directives: stream URLs, tokens and display metadata
#[derive(Debug, Clone)]
pub struct DirectiveBuilder {
    stream_base: String,
    fallback_art_url: Option<String>,
}

impl DirectiveBuilder {
    pub fn new(stream_base_url: &str, fallback_art_url: Option<String>) -> Result<Self> {
        Url::parse(stream_base_url)
            .with_context(|| format!("invalid stream base URL: {}", stream_base_url))?;
        Ok(Self {
            stream_base: stream_base_url.trim_end_matches('/').to_string(),
            fallback_art_url,
        })
    }

    /// URL the player fetches for `track_id`.
    ///
    /// Remote streams (radio) are passed through; library paths are appended
    /// to the stream base with each segment percent-encoded.
    pub fn stream_url(&self, track_id: &str) -> String {
        if track_id.starts_with("http://") || track_id.starts_with("https://") {
            return track_id.to_string();
        }
        let path = track_id
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}", self.stream_base, path)
    }

    /// REPLACE_ALL for the snapshot's head; `None` when it has no head
    pub fn replace_all(&self, snapshot: &NowPlaying, offset_ms: u64) -> Option<Directive> {
        let head = snapshot.head()?;
        Some(self.play(
            PlayBehavior::ReplaceAll,
            &head,
            offset_ms,
            None,
            Some(self.metadata(snapshot)),
        ))
    }

    /// REPLACE_ALL re-issuing an existing token (resume)
    pub fn replace_all_token(&self, token: &PlaybackToken, offset_ms: u64) -> Option<Directive> {
        let track = token.track_ref()?;
        Some(self.play(PlayBehavior::ReplaceAll, &track, offset_ms, None, None))
    }

    /// ENQUEUE for the snapshot's head, chained after `expected_previous`
    pub fn enqueue(
        &self,
        snapshot: &NowPlaying,
        expected_previous: &PlaybackToken,
    ) -> Option<Directive> {
        let head = snapshot.head()?;
        Some(self.play(
            PlayBehavior::Enqueue,
            &head,
            0,
            Some(expected_previous.to_string()),
            Some(self.metadata(snapshot)),
        ))
    }

    fn play(
        &self,
        play_behavior: PlayBehavior,
        track: &TrackRef,
        offset_ms: u64,
        expected_previous_token: Option<String>,
        metadata: Option<Metadata>,
    ) -> Directive {
        Directive::Play {
            play_behavior,
            audio_item: AudioItem {
                stream: Stream {
                    token: encode(track).to_string(),
                    url: self.stream_url(&track.track_id),
                    offset_in_milliseconds: offset_ms,
                    expected_previous_token,
                },
                metadata,
            },
        }
    }

    fn metadata(&self, snapshot: &NowPlaying) -> Metadata {
        let title = if snapshot.title.trim().is_empty() {
            file_stem(&snapshot.track_id)
        } else {
            snapshot.title.clone()
        };
        let subtitle = [snapshot.artist.as_str(), snapshot.album.as_str()]
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" - ");
        let art = snapshot
            .art_url
            .clone()
            .filter(|u| !u.is_empty())
            .or_else(|| self.fallback_art_url.clone())
            .map(|url| Art {
                sources: vec![ArtSource { url }],
            });

        Metadata {
            title,
            subtitle,
            art,
        }
    }
}

/// Last path segment without its extension
fn file_stem(track_id: &str) -> String {
    let name = track_id.rsplit('/').next().unwrap_or(track_id);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}
