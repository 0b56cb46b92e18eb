//! Idempotency guards
//!
//! The player re-delivers and reorders lifecycle events, so every queue
//! mutation is gated on a dedup ledger keyed by playback token:
//!
//! - `advanced:<token>`: an advance for this token was confirmed
//! - `advancing:<token>`: an advance is in flight (claim, short TTL)
//! - `enqueued:<token>`: an ENQUEUE directive was issued for this token
//! - `enqueued-after:<token>`: an ENQUEUE was issued that expects this token
//!   to be the one finishing
//!
//! Keys use the canonical token form, so a re-padded echo of a token shares
//! its records. Records are only written after the corresponding call settled
//! successfully; a failed advance releases its claim so a later event retries.

mod memory;
mod redis_store;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use memory::InMemoryLedger;
pub use redis_store::RedisLedger;

use crate::config::DedupConfig;
use crate::token::PlaybackToken;

/// Key-expiring store behind the guards
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Short backend name for status output
    fn backend(&self) -> &'static str;

    /// Store `value` under `key` for `ttl` unless a live entry exists.
    /// Returns whether this call inserted.
    async fn insert_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Store `value` under `key` for `ttl`, replacing any entry
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn remove(&self, key: &str) -> Result<()>;
}

/// A confirmed advance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvanceRecord {
    pub token_key: String,
    pub timestamp: DateTime<Utc>,
}

/// An issued ENQUEUE directive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueRecord {
    pub token_key: String,
    pub timestamp: DateTime<Utc>,
    pub previous_token_key: String,
}

/// Retention windows for each record kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardWindows {
    pub advance: Duration,
    pub enqueue: Duration,
    /// Slightly longer than `advance`
    pub enqueue_link: Duration,
    /// Lifetime of an in-flight advance claim; covers one authority call
    pub in_flight: Duration,
}

impl From<&DedupConfig> for GuardWindows {
    fn from(config: &DedupConfig) -> Self {
        Self {
            advance: Duration::from_secs(config.advance_window_secs),
            enqueue: Duration::from_secs(config.enqueue_window_secs),
            enqueue_link: Duration::from_secs(config.enqueue_link_window_secs),
            in_flight: Duration::from_secs(config.in_flight_secs),
        }
    }
}

/// Outcome of trying to start an advance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceClaim {
    /// Caller owns the advance and must confirm or release it
    Claimed,
    /// Already confirmed within the window
    AlreadyAdvanced,
    /// Another invocation is mid-call for the same token
    InFlight,
}

#[derive(Clone)]
pub struct Guards {
    ledger: Arc<dyn Ledger>,
    windows: GuardWindows,
}

impl Guards {
    pub fn new(ledger: Arc<dyn Ledger>, windows: GuardWindows) -> Self {
        Self { ledger, windows }
    }

    /// In-memory guards with the given windows
    pub fn in_memory(windows: GuardWindows) -> Self {
        Self::new(Arc::new(InMemoryLedger::new()), windows)
    }

    pub fn backend(&self) -> &'static str {
        self.ledger.backend()
    }

    pub fn windows(&self) -> GuardWindows {
        self.windows
    }

    /// True if an advance was confirmed for this exact token within the window
    pub async fn recently_advanced(&self, token: &PlaybackToken) -> bool {
        self.present(&advanced_key(token)).await
    }

    /// True if an ENQUEUE was issued for this exact token within the window
    pub async fn recently_enqueued(&self, token: &PlaybackToken) -> bool {
        self.present(&enqueued_key(token)).await
    }

    /// True if an ENQUEUE was issued whose expected previous token is `previous`
    pub async fn issued_enqueue_for(&self, previous: &PlaybackToken) -> bool {
        self.present(&enqueued_after_key(previous)).await
    }

    /// Claim the right to advance `token`.
    ///
    /// A ledger failure grants the claim; the authority's identity check
    /// absorbs the repeat.
    pub async fn claim_advance(&self, token: &PlaybackToken) -> AdvanceClaim {
        if self.recently_advanced(token).await {
            return AdvanceClaim::AlreadyAdvanced;
        }
        let now = Utc::now().to_rfc3339();
        match self
            .ledger
            .insert_if_absent(&advancing_key(token), &now, self.windows.in_flight)
            .await
        {
            Ok(true) => {
                // A concurrent holder records before releasing, so a claim won
                // right after its release must see the record here
                if self.recently_advanced(token).await {
                    self.release_advance(token).await;
                    return AdvanceClaim::AlreadyAdvanced;
                }
                AdvanceClaim::Claimed
            }
            Ok(false) => AdvanceClaim::InFlight,
            Err(e) => {
                warn!(error = %e, token = %token, "Dedup ledger claim failed, proceeding");
                AdvanceClaim::Claimed
            }
        }
    }

    /// Drop an in-flight claim (after success or failure)
    pub async fn release_advance(&self, token: &PlaybackToken) {
        if let Err(e) = self.ledger.remove(&advancing_key(token)).await {
            warn!(error = %e, token = %token, "Failed to release advance claim");
        }
    }

    /// Record a confirmed advance
    pub async fn record_advance(&self, token: &PlaybackToken) {
        let record = AdvanceRecord {
            token_key: token.canonical().to_string(),
            timestamp: Utc::now(),
        };
        self.write(&advanced_key(token), &record, self.windows.advance)
            .await;
    }

    /// Record an issued ENQUEUE for `token` following `previous`
    pub async fn record_enqueue(&self, token: &PlaybackToken, previous: &PlaybackToken) {
        let record = EnqueueRecord {
            token_key: token.canonical().to_string(),
            timestamp: Utc::now(),
            previous_token_key: previous.canonical().to_string(),
        };
        self.write(&enqueued_key(token), &record, self.windows.enqueue)
            .await;
        self.write(
            &enqueued_after_key(previous),
            &record,
            self.windows.enqueue_link,
        )
        .await;
    }

    /// Last enqueue issued after `previous`, if still retained
    pub async fn enqueue_after(&self, previous: &PlaybackToken) -> Option<EnqueueRecord> {
        match self.ledger.get(&enqueued_after_key(previous)).await {
            Ok(value) => value.and_then(|v| serde_json::from_str(&v).ok()),
            Err(e) => {
                warn!(error = %e, "Dedup ledger read failed");
                None
            }
        }
    }

    async fn present(&self, key: &str) -> bool {
        match self.ledger.contains(key).await {
            Ok(present) => present,
            Err(e) => {
                // Unknown is treated as "not recorded" so events keep making progress
                warn!(error = %e, key, "Dedup ledger read failed");
                false
            }
        }
    }

    async fn write<T: Serialize>(&self, key: &str, record: &T, ttl: Duration) {
        let value = match serde_json::to_string(record) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, key, "Failed to serialize dedup record");
                return;
            }
        };
        match self.ledger.put(key, &value, ttl).await {
            Ok(()) => debug!(key, ttl_ms = ttl.as_millis() as u64, "Dedup record written"),
            Err(e) => warn!(error = %e, key, "Dedup ledger write failed"),
        }
    }
}

fn advanced_key(token: &PlaybackToken) -> String {
    format!("advanced:{}", token.canonical())
}

fn advancing_key(token: &PlaybackToken) -> String {
    format!("advancing:{}", token.canonical())
}

fn enqueued_key(token: &PlaybackToken) -> String {
    format!("enqueued:{}", token.canonical())
}

fn enqueued_after_key(token: &PlaybackToken) -> String {
    format!("enqueued-after:{}", token.canonical())
}
