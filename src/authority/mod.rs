//! Queue authority access
//!
//! The queue authority owns the single ordered list of what plays next. The
//! engine can only observe its head (`GET /now-playing`) and ask it to drop a
//! slot and re-select (`POST /queue/advance`).

pub mod client;
pub mod error;
pub mod model;

use async_trait::async_trait;

pub use client::{HttpAuthority, SHARED_KEY_HEADER};
pub use error::AuthorityError;
pub use model::{AdvanceOutcome, AdvanceRequest, AdvanceResponse, NowPlaying};

/// Operations the engine needs from the queue authority
#[async_trait]
pub trait QueueAuthority: Send + Sync {
    /// Current head, or `None` when nothing is selected.
    /// Performs no mutation.
    async fn now_playing(&self) -> Result<Option<NowPlaying>, AuthorityError>;

    /// Advance-and-prime: remove the slot at `queue_position` (when it still
    /// holds `track_id`) and force the authority to select a new head.
    async fn advance(
        &self,
        queue_position: u32,
        track_id: Option<&str>,
    ) -> Result<AdvanceOutcome, AuthorityError>;
}
