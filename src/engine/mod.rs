//! Synchronization engine
//!
//! Reacts to player lifecycle events, decides whether the queue authority
//! needs a mutation, performs it, and answers with directives.
//!
//! Every invocation is independent: there is no ordering between events
//! beyond what the dedup guards provide, and every authority call is bounded
//! by a timeout. A failed or timed-out call is logged and leaves the guards
//! untouched, so the next event can retry. Handlers never return errors; the
//! worst outcome is an empty directive list.

pub mod directive;
pub mod event;
pub mod state;

use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub use directive::{Directive, DirectiveBuilder, PlayBehavior};
pub use event::{IdleReason, Intent, IntentRequest, LifecycleEvent, PlayerEvent};
pub use state::{ResumeState, SessionEntry, SlotState, Transition};

use crate::authority::{AuthorityError, QueueAuthority};
use crate::guards::{AdvanceClaim, Guards};
use crate::reader::{ReaderTiming, StabilizedReader};
use crate::token::{encode, PlaybackToken, TrackRef};
use state::{
    decide_enqueue, decide_finished, decide_start, EnqueueDecision, FinishDecision, SessionBook,
    StartDecision,
};

/// Snapshot of engine state for `/status`
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub ledger: &'static str,
    pub resume: Option<ResumeState>,
    pub sessions: Vec<SessionEntry>,
}

pub struct SyncEngine {
    authority: Arc<dyn QueueAuthority>,
    reader: StabilizedReader,
    guards: Guards,
    directives: DirectiveBuilder,
    call_timeout: Duration,
    sessions: SessionBook,
    resume: Mutex<Option<ResumeState>>,
}

impl SyncEngine {
    pub fn new(
        authority: Arc<dyn QueueAuthority>,
        reader_timing: ReaderTiming,
        guards: Guards,
        directives: DirectiveBuilder,
        call_timeout: Duration,
    ) -> Self {
        Self {
            reader: StabilizedReader::new(authority.clone(), reader_timing),
            authority,
            guards,
            directives,
            call_timeout,
            sessions: SessionBook::new(),
            resume: Mutex::new(None),
        }
    }

    /// Handle one lifecycle event and return the directives for the player
    pub async fn handle_event(&self, event: LifecycleEvent) -> Vec<Directive> {
        let step = self.sessions.apply(&event);
        if step.accepted {
            debug!(
                event = event.name(),
                token = %event.token(),
                from = ?step.from,
                to = ?step.to,
                "Lifecycle event"
            );
        } else {
            info!(
                event = event.name(),
                token = %event.token(),
                state = ?step.to,
                "Late or out-of-order event, slot state unchanged"
            );
        }

        let directive = match event {
            LifecycleEvent::Started { token, offset_ms } => {
                self.on_started(&token, offset_ms).await;
                None
            }
            LifecycleEvent::Idle {
                token,
                offset_ms,
                reason,
            } => {
                self.on_idle(token, offset_ms, reason);
                None
            }
            LifecycleEvent::NearlyFinished { token } => self.on_nearly_finished(&token).await,
            LifecycleEvent::Finished { token } => self.on_finished(&token).await,
        };

        directive.into_iter().collect()
    }

    /// Handle a spoken intent
    pub async fn handle_intent(&self, intent: Intent) -> Vec<Directive> {
        debug!(?intent, "Intent");
        let directive = match intent {
            Intent::Play | Intent::Next => self.start_from_head().await,
            Intent::Resume => match self.resume_directive() {
                Some(directive) => Some(directive),
                None => self.start_from_head().await,
            },
            Intent::Pause | Intent::Stop => Some(Directive::Stop),
        };
        directive.into_iter().collect()
    }

    /// REPLACE_ALL at the stored pause point, if it names one of our tracks
    fn resume_directive(&self) -> Option<Directive> {
        let resume = self.resume_state()?;
        let Some(directive) = self
            .directives
            .replace_all_token(&resume.token, resume.offset_ms)
        else {
            info!(token = %resume.token, "Pause point is not a track reference, starting from head");
            return None;
        };
        info!(
            token = %resume.token,
            offset_ms = resume.offset_ms,
            "Resuming from pause point"
        );
        self.sessions.arm(&resume.token);
        Some(directive)
    }

    pub fn resume_state(&self) -> Option<ResumeState> {
        self.resume
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn slot_state(&self, token: &PlaybackToken) -> Option<SlotState> {
        self.sessions.state(token)
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            ledger: self.guards.backend(),
            resume: self.resume_state(),
            sessions: self.sessions.recent(),
        }
    }

    async fn on_started(&self, token: &PlaybackToken, offset_ms: u64) {
        let resume = self.resume_state();
        let recently_advanced = self.guards.recently_advanced(token).await;

        match decide_start(token, offset_ms, resume.as_ref(), recently_advanced) {
            StartDecision::Resume => {
                info!(token = %token, offset_ms, "Playback resumed, queue already correct");
            }
            StartDecision::Duplicate => {
                debug!(token = %token, "Duplicate start, already advanced");
            }
            StartDecision::Undecodable => {
                warn!(token = %token, "Start token is not a track reference, not advancing");
            }
            StartDecision::Advance(track) => {
                self.advance_once(token, &track).await;
            }
        }
    }

    fn on_idle(&self, token: PlaybackToken, offset_ms: u64, reason: IdleReason) {
        info!(token = %token, offset_ms, ?reason, "Recording resume point");
        let mut resume = self
            .resume
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *resume = Some(ResumeState {
            token,
            offset_ms,
            reason,
        });
    }

    async fn on_nearly_finished(&self, token: &PlaybackToken) -> Option<Directive> {
        let Some(finishing) = token.track_ref() else {
            warn!(token = %token, "Nearly-finished token is not a track reference");
            return None;
        };

        // Covers a start whose advance failed or never arrived
        self.advance_once(token, &finishing).await;

        // A repeat of this event would otherwise see the track after the one
        // already enqueued and chain it behind the wrong predecessor
        if self.guards.issued_enqueue_for(token).await {
            debug!(token = %token, "Enqueue already issued after this token");
            return None;
        }

        let snapshot = self.reader.read_stable().await;
        let candidate = match decide_enqueue(&finishing, snapshot.as_ref()) {
            EnqueueDecision::NoHead => {
                info!(token = %token, "Nothing queued after finishing track");
                return None;
            }
            EnqueueDecision::Stale => {
                info!(
                    token = %token,
                    track_id = %finishing.track_id,
                    "Head still shows finishing track, skipping enqueue this cycle"
                );
                return None;
            }
            EnqueueDecision::Candidate(candidate) => candidate,
        };

        let candidate_token = encode(&candidate);
        if self.guards.recently_enqueued(&candidate_token).await {
            debug!(token = %candidate_token, "Already enqueued, skipping");
            return None;
        }

        let directive = self.directives.enqueue(snapshot.as_ref()?, token)?;
        self.guards.record_enqueue(&candidate_token, token).await;
        self.sessions.arm(&candidate_token);
        info!(
            token = %candidate_token,
            track_id = %candidate.track_id,
            queue_position = candidate.queue_position,
            expected_previous = %token,
            "Enqueueing next track"
        );

        // Keeps the next lookahead pointing past the enqueued track
        self.advance_once(&candidate_token, &candidate).await;

        Some(directive)
    }

    async fn on_finished(&self, token: &PlaybackToken) -> Option<Directive> {
        let issued = self.guards.issued_enqueue_for(token).await;
        if decide_finished(issued) == FinishDecision::HandedOff {
            debug!(token = %token, "Enqueued stream continues playback");
            return None;
        }

        warn!(token = %token, "No enqueue chained after finished track, falling back");

        if let Some(finishing) = token.track_ref() {
            self.advance_once(token, &finishing).await;
        }

        let Some(snapshot) = self.reader.read_stable().await else {
            warn!(token = %token, "Fallback found nothing to play");
            return None;
        };
        let head = snapshot.head()?;
        let directive = self.directives.replace_all(&snapshot, 0)?;
        let head_token = encode(&head);
        self.sessions.arm(&head_token);
        info!(
            token = %head_token,
            track_id = %head.track_id,
            queue_position = head.queue_position,
            "Restarting playback from queue head"
        );

        self.advance_once(&head_token, &head).await;

        Some(directive)
    }

    /// REPLACE_ALL for the authority's current head, without advancing;
    /// the player's start event for it performs the advance.
    async fn start_from_head(&self) -> Option<Directive> {
        let Some(snapshot) = self.reader.read_stable().await else {
            info!("Queue is empty, nothing to play");
            return None;
        };
        let directive = self.directives.replace_all(&snapshot, 0)?;
        if let Some(head) = snapshot.head() {
            self.sessions.arm(&encode(&head));
        }
        Some(directive)
    }

    /// Advance `track` at most once per token within the dedup window.
    ///
    /// The advance record is written only after the authority confirmed the
    /// call; failures release the claim so a later event can retry.
    async fn advance_once(&self, token: &PlaybackToken, track: &TrackRef) -> bool {
        match self.guards.claim_advance(token).await {
            AdvanceClaim::Claimed => {}
            AdvanceClaim::AlreadyAdvanced => {
                debug!(token = %token, "Advance already confirmed");
                return false;
            }
            AdvanceClaim::InFlight => {
                debug!(token = %token, "Advance already in flight");
                return false;
            }
        }

        let result = match timeout(
            self.call_timeout,
            self.authority
                .advance(track.queue_position, Some(&track.track_id)),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AuthorityError::Timeout),
        };

        let advanced = match result {
            Ok(outcome) => {
                info!(
                    token = %token,
                    queue_position = track.queue_position,
                    primed_only = outcome.primed_only,
                    next = ?outcome.now_playing.as_ref().map(|np| np.track_id.as_str()),
                    "Queue advanced"
                );
                self.guards.record_advance(token).await;
                true
            }
            Err(e) => {
                warn!(
                    token = %token,
                    queue_position = track.queue_position,
                    error = %e,
                    transient = e.is_transient(),
                    "Queue advance not confirmed"
                );
                false
            }
        };

        self.guards.release_advance(token).await;
        advanced
    }
}
