//! Slot state machine and the pure decisions behind each handler
//!
//! ```text
//! Armed ──start──▶ Started ──nearly──▶ NearlyDone ──finished──▶ Done
//!                    │  ▲
//!               idle │  │ start (resume)
//!                    ▼  │
//!                   Paused
//! ```
//!
//! `Done` is terminal: late duplicates of any event leave a finished slot
//! finished, and only a new directive for the same token re-arms it. A late
//! start for a slot already nearly done is ignored as well. Ignored events
//! still reach the handlers; the guards decide what they do. The interesting
//! work is in the `decide_*` functions, which take already-gathered facts and
//! return what the effect layer in [`super::SyncEngine`] should do.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::event::{IdleReason, LifecycleEvent};
use crate::authority::NowPlaying;
use crate::token::{PlaybackToken, TrackRef};

/// Sessions remembered for status output
const SESSION_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    /// Directive issued, not yet confirmed started
    Armed,
    Started,
    NearlyDone,
    Done,
    Paused,
}

/// Next state for a slot after `event`.
///
/// `Err` carries the unchanged state when the event does not apply to it.
pub fn transition(
    current: Option<SlotState>,
    event: &LifecycleEvent,
) -> Result<SlotState, SlotState> {
    use SlotState::*;
    match (current, event) {
        (Some(Done), _) => Err(Done),
        (_, LifecycleEvent::Finished { .. }) => Ok(Done),
        (Some(NearlyDone), LifecycleEvent::Started { .. }) => Err(NearlyDone),
        (_, LifecycleEvent::Started { .. }) => Ok(Started),
        (_, LifecycleEvent::NearlyFinished { .. }) => Ok(NearlyDone),
        (_, LifecycleEvent::Idle { .. }) => Ok(Paused),
    }
}

/// Result of applying one event to the session book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Option<SlotState>,
    pub to: SlotState,
    /// False when the event did not apply and the slot kept its state
    pub accepted: bool,
}

/// Last known pause/stop point
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumeState {
    pub token: PlaybackToken,
    pub offset_ms: u64,
    pub reason: IdleReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartDecision {
    /// Same token as the pause point, mid-track: the head was already right
    Resume,
    /// Advance already confirmed for this token
    Duplicate,
    /// Token is not ours or is malformed; nothing can be mutated safely
    Undecodable,
    /// Remove this slot and re-select
    Advance(TrackRef),
}

pub fn decide_start(
    token: &PlaybackToken,
    offset_ms: u64,
    resume: Option<&ResumeState>,
    recently_advanced: bool,
) -> StartDecision {
    if offset_ms > 0 && resume.is_some_and(|r| r.token.canonical() == token.canonical()) {
        return StartDecision::Resume;
    }
    if recently_advanced {
        return StartDecision::Duplicate;
    }
    match token.track_ref() {
        Some(track) => StartDecision::Advance(track),
        None => StartDecision::Undecodable,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueDecision {
    /// Stabilized read found nothing next
    NoHead,
    /// Head still shows the finishing track; the authority has not
    /// re-selected yet
    Stale,
    Candidate(TrackRef),
}

pub fn decide_enqueue(finishing: &TrackRef, snapshot: Option<&NowPlaying>) -> EnqueueDecision {
    let Some(head) = snapshot.and_then(NowPlaying::head) else {
        return EnqueueDecision::NoHead;
    };
    if head.track_id == finishing.track_id {
        return EnqueueDecision::Stale;
    }
    EnqueueDecision::Candidate(head)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishDecision {
    /// An ENQUEUE chained after this token was issued; the player continues
    HandedOff,
    /// Nothing was chained; restart from the authority's head
    Fallback,
}

pub fn decide_finished(issued_enqueue: bool) -> FinishDecision {
    if issued_enqueue {
        FinishDecision::HandedOff
    } else {
        FinishDecision::Fallback
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionEntry {
    pub token: PlaybackToken,
    pub state: SlotState,
}

/// Bounded record of recent slots and their states.
///
/// Only used for logging and status; decisions never read it.
#[derive(Default)]
pub struct SessionBook {
    entries: Mutex<VecDeque<SessionEntry>>,
}

impl SessionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `event` to its slot
    pub fn apply(&self, event: &LifecycleEvent) -> Transition {
        let mut accepted = true;
        let (from, to) = self.update(event.token(), |current| {
            transition(current, event).unwrap_or_else(|unchanged| {
                accepted = false;
                unchanged
            })
        });
        Transition { from, to, accepted }
    }

    /// Mark a slot as armed by a directive we just issued
    pub fn arm(&self, token: &PlaybackToken) {
        self.update(token, |_| SlotState::Armed);
    }

    pub fn state(&self, token: &PlaybackToken) -> Option<SlotState> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.iter().find(|e| &e.token == token).map(|e| e.state)
    }

    /// Most recent first
    pub fn recent(&self) -> Vec<SessionEntry> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.iter().rev().cloned().collect()
    }

    fn update(
        &self,
        token: &PlaybackToken,
        next: impl FnOnce(Option<SlotState>) -> SlotState,
    ) -> (Option<SlotState>, SlotState) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = entries
            .iter()
            .position(|e| &e.token == token)
            .and_then(|idx| entries.remove(idx))
            .map(|e| e.state);
        let state = next(previous);
        entries.push_back(SessionEntry {
            token: token.clone(),
            state,
        });
        while entries.len() > SESSION_CAPACITY {
            entries.pop_front();
        }
        (previous, state)
    }
}
