//! Process-local ledger with per-entry expiry

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::Ledger;

/// Sweep expired entries once the map grows past this many keys
const SWEEP_THRESHOLD: usize = 256;

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-memory ledger.
///
/// Every operation runs under one short, non-async critical section, so
/// `insert_if_absent` is atomic within the process. It is not shared across
/// processes; use [`super::RedisLedger`] for that.
#[derive(Default)]
pub struct InMemoryLedger {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>, Instant) -> T) -> T {
        let now = Instant::now();
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if entries.len() > SWEEP_THRESHOLD {
            let before = entries.len();
            entries.retain(|_, entry| entry.is_live(now));
            debug!(
                removed = before - entries.len(),
                remaining = entries.len(),
                "Swept expired ledger entries"
            );
        }
        f(&mut entries, now)
    }

    /// Live entry count (for status and tests)
    pub fn len(&self) -> usize {
        self.with_entries(|entries, now| entries.values().filter(|e| e.is_live(now)).count())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn insert_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        Ok(self.with_entries(|entries, now| {
            if entries.get(key).is_some_and(|e| e.is_live(now)) {
                return false;
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: now + ttl,
                },
            );
            true
        }))
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.with_entries(|entries, now| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: now + ttl,
                },
            );
        });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.with_entries(|entries, now| match entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.with_entries(|entries, _| {
            entries.remove(key);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_if_absent_is_exclusive() {
        let ledger = InMemoryLedger::new();
        let ttl = Duration::from_secs(10);
        assert!(ledger.insert_if_absent("k", "1", ttl).await.unwrap());
        assert!(!ledger.insert_if_absent("k", "2", ttl).await.unwrap());
        assert_eq!(ledger.get("k").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn entries_expire() {
        let ledger = InMemoryLedger::new();
        ledger
            .put("k", "v", Duration::from_millis(20))
            .await
            .unwrap();
        assert!(ledger.get("k").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(ledger.get("k").await.unwrap().is_none());
        assert!(ledger
            .insert_if_absent("k", "again", Duration::from_secs(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn remove_clears_entry() {
        let ledger = InMemoryLedger::new();
        ledger.put("k", "v", Duration::from_secs(5)).await.unwrap();
        ledger.remove("k").await.unwrap();
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn concurrent_claims_admit_one_winner() {
        let ledger = std::sync::Arc::new(InMemoryLedger::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .insert_if_absent("race", &i.to_string(), Duration::from_secs(5))
                    .await
                    .unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
