//! Wire types shared by the engine's client and the queue agent

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::token::TrackRef;

/// Read-only projection of the queue authority's current head.
///
/// Not stable: a concurrent advance can make two reads taken milliseconds
/// apart disagree. See [`crate::reader::StabilizedReader`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NowPlaying {
    #[serde(rename = "file", alias = "trackId", default)]
    pub track_id: String,
    #[serde(
        rename = "songpos",
        alias = "queuePosition",
        default,
        deserialize_with = "lenient_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub queue_position: Option<u32>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(
        rename = "artUrl",
        alias = "coverurl",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub art_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub elapsed: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub duration: f64,
}

impl NowPlaying {
    /// Track reference for this head, or `None` when nothing is selected
    pub fn head(&self) -> Option<TrackRef> {
        if self.track_id.is_empty() {
            return None;
        }
        self.queue_position
            .map(|pos| TrackRef::new(self.track_id.clone(), pos))
    }

    pub fn has_head(&self) -> bool {
        self.head().is_some()
    }
}

/// Body of `POST /queue/advance`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvanceRequest {
    #[serde(rename = "queuePosition")]
    pub queue_position: u32,
    #[serde(rename = "trackId", default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<String>,
}

/// Response of `POST /queue/advance`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdvanceResponse {
    pub ok: bool,
    /// Identity check failed, so only the re-select step ran
    #[serde(rename = "primedOnly", default)]
    pub primed_only: bool,
    #[serde(rename = "nowPlaying", default, skip_serializing_if = "Option::is_none")]
    pub now_playing: Option<NowPlaying>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Confirmed result of an advance call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdvanceOutcome {
    pub primed_only: bool,
    pub now_playing: Option<NowPlaying>,
}

/// Accept numbers, numeric strings, empty strings and null.
/// MPD front ends report `songpos` as a string.
fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    })
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    })
}
