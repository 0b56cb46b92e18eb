//! Player lifecycle events and intents

use serde::{Deserialize, Serialize};

use crate::token::PlaybackToken;

/// Request body the player's webhook posts for each playback event
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    #[serde(rename = "AudioPlayer.PlaybackStarted")]
    PlaybackStarted(EventBody),
    #[serde(rename = "AudioPlayer.PlaybackNearlyFinished")]
    PlaybackNearlyFinished(EventBody),
    #[serde(rename = "AudioPlayer.PlaybackFinished")]
    PlaybackFinished(EventBody),
    #[serde(rename = "AudioPlayer.PlaybackStopped")]
    PlaybackStopped(EventBody),
    #[serde(rename = "AudioPlayer.PlaybackPaused")]
    PlaybackPaused(EventBody),
    #[serde(rename = "AudioPlayer.PlaybackFailed")]
    PlaybackFailed(EventBody),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventBody {
    #[serde(default)]
    pub token: String,
    #[serde(rename = "offsetInMilliseconds", default)]
    pub offset_in_milliseconds: u64,
}

/// Why playback went idle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleReason {
    Paused,
    Stopped,
    Failed,
}

/// Lifecycle event as the engine sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Started {
        token: PlaybackToken,
        offset_ms: u64,
    },
    NearlyFinished {
        token: PlaybackToken,
    },
    Finished {
        token: PlaybackToken,
    },
    Idle {
        token: PlaybackToken,
        offset_ms: u64,
        reason: IdleReason,
    },
}

impl LifecycleEvent {
    pub fn token(&self) -> &PlaybackToken {
        match self {
            LifecycleEvent::Started { token, .. }
            | LifecycleEvent::NearlyFinished { token }
            | LifecycleEvent::Finished { token }
            | LifecycleEvent::Idle { token, .. } => token,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Started { .. } => "started",
            LifecycleEvent::NearlyFinished { .. } => "nearly_finished",
            LifecycleEvent::Finished { .. } => "finished",
            LifecycleEvent::Idle { .. } => "idle",
        }
    }
}

impl PlayerEvent {
    /// Engine view of this event; `None` for types the engine ignores
    pub fn into_lifecycle(self) -> Option<LifecycleEvent> {
        let idle = |body: EventBody, reason| LifecycleEvent::Idle {
            token: PlaybackToken::from_wire(body.token),
            offset_ms: body.offset_in_milliseconds,
            reason,
        };

        Some(match self {
            PlayerEvent::PlaybackStarted(body) => LifecycleEvent::Started {
                token: PlaybackToken::from_wire(body.token),
                offset_ms: body.offset_in_milliseconds,
            },
            PlayerEvent::PlaybackNearlyFinished(body) => LifecycleEvent::NearlyFinished {
                token: PlaybackToken::from_wire(body.token),
            },
            PlayerEvent::PlaybackFinished(body) => LifecycleEvent::Finished {
                token: PlaybackToken::from_wire(body.token),
            },
            PlayerEvent::PlaybackStopped(body) => idle(body, IdleReason::Stopped),
            PlayerEvent::PlaybackPaused(body) => idle(body, IdleReason::Paused),
            PlayerEvent::PlaybackFailed(body) => idle(body, IdleReason::Failed),
            PlayerEvent::Unknown => return None,
        })
    }
}

/// Spoken requests that start or control a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Play,
    Resume,
    Next,
    Pause,
    Stop,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntentRequest {
    pub intent: Intent,
}
