//! Playback token codec
//!
//! A playback token is the only identifier the player echoes back in its
//! lifecycle events, so it carries the queue slot it was built for:
//!
//! ```text
//! mpdq:<url-safe base64 of {"trackId":"...","queuePosition":N}>
//! ```
//!
//! Encoding is deterministic (fixed field order, no padding). Decoding also
//! accepts padded payloads, so anything keyed by token identity should use
//! [`PlaybackToken::canonical`].

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed prefix that marks tokens minted by this bridge
pub const TOKEN_PREFIX: &str = "mpdq";

/// What is queued (`track_id`) and where it sits (`queue_position`).
///
/// Positions are assigned by the queue authority and shift on every
/// removal; they are only meaningful at the instant they were read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackRef {
    #[serde(rename = "trackId")]
    pub track_id: String,
    #[serde(rename = "queuePosition")]
    pub queue_position: u32,
}

impl TrackRef {
    pub fn new(track_id: impl Into<String>, queue_position: u32) -> Self {
        Self {
            track_id: track_id.into(),
            queue_position,
        }
    }
}

/// Opaque token handed to the player inside Play directives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaybackToken(String);

impl PlaybackToken {
    /// Wrap a token string received from the player. No validation happens
    /// here; use [`decode`] to recover the track reference.
    pub fn from_wire(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Track reference embedded in this token, if it is one of ours
    pub fn track_ref(&self) -> Option<TrackRef> {
        decode(&self.0)
    }

    /// The encoder's form of this token when it decodes; unchanged otherwise
    pub fn canonical(&self) -> PlaybackToken {
        self.track_ref()
            .map(|track| encode(&track))
            .unwrap_or_else(|| self.clone())
    }
}

impl fmt::Display for PlaybackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&TrackRef> for PlaybackToken {
    fn from(track: &TrackRef) -> Self {
        encode(track)
    }
}

/// Encode a track reference into a token.
pub fn encode(track: &TrackRef) -> PlaybackToken {
    // Serializing a struct of a String and a u32 cannot fail.
    let json = serde_json::to_vec(track).unwrap_or_default();
    PlaybackToken(format!(
        "{}:{}",
        TOKEN_PREFIX,
        URL_SAFE_NO_PAD.encode(json)
    ))
}

/// Decode a token string. Returns `None` for foreign prefixes, bad base64,
/// or payloads that are not a complete track reference.
pub fn decode(raw: &str) -> Option<TrackRef> {
    let payload = raw.strip_prefix(TOKEN_PREFIX)?.strip_prefix(':')?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice::<TrackRef>(&bytes).ok()
}
