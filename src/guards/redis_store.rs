//! Redis-backed ledger shared by every engine process
//!
//! Guards become `SET key value NX PX ttl`, which is atomic across processes,
//! so parallel invocations or recycled instances still see each other's
//! records. When Redis is unreachable the ledger degrades to a per-process
//! fallback instead of failing the event.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

use super::{InMemoryLedger, Ledger};

const KEY_PREFIX: &str = "qsync";

/// Bound on connecting and on each command when none is configured
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(1);

pub struct RedisLedger {
    redis: Arc<redis::Client>,
    fallback: InMemoryLedger,
    op_timeout: Duration,
}

impl RedisLedger {
    pub fn new(redis: redis::Client, op_timeout: Duration) -> Self {
        Self {
            redis: Arc::new(redis),
            fallback: InMemoryLedger::new(),
            op_timeout,
        }
    }

    /// Open a client for `redis_url`. Fails only on an unparsable URL;
    /// connectivity is checked per operation.
    pub fn open(redis_url: &str, op_timeout: Duration) -> Result<Self> {
        Ok(Self::new(redis::Client::open(redis_url)?, op_timeout))
    }

    fn full_key(key: &str) -> String {
        format!("{}:{}", KEY_PREFIX, key)
    }

    fn ttl_millis(ttl: Duration) -> u64 {
        (ttl.as_millis() as u64).max(1)
    }

    async fn connection(&self) -> Option<redis::aio::MultiplexedConnection> {
        match timeout(self.op_timeout, self.redis.get_multiplexed_async_connection()).await {
            Ok(Ok(conn)) => Some(conn),
            Ok(Err(e)) => {
                warn!(
                    error = %e,
                    "Redis unavailable for dedup ledger, using in-memory fallback"
                );
                None
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.op_timeout.as_millis() as u64,
                    "Redis connect timed out, using in-memory fallback"
                );
                None
            }
        }
    }

    /// Run `cmd`; `None` means Redis was unreachable or too slow and the
    /// caller should use the fallback
    async fn run<T: redis::FromRedisValue>(
        &self,
        cmd: &redis::Cmd,
    ) -> Option<redis::RedisResult<T>> {
        let mut conn = self.connection().await?;
        match timeout(self.op_timeout, cmd.query_async(&mut conn)).await {
            Ok(result) => Some(result),
            Err(_) => {
                warn!(
                    timeout_ms = self.op_timeout.as_millis() as u64,
                    "Redis command timed out, using in-memory fallback"
                );
                None
            }
        }
    }
}

#[async_trait]
impl Ledger for RedisLedger {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn insert_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(Self::full_key(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(Self::ttl_millis(ttl));

        match self.run::<Option<String>>(&cmd).await {
            Some(reply) => Ok(reply?.is_some()),
            None => self.fallback.insert_if_absent(key, value, ttl).await,
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(Self::full_key(key))
            .arg(value)
            .arg("PX")
            .arg(Self::ttl_millis(ttl));

        match self.run::<()>(&cmd).await {
            Some(reply) => Ok(reply?),
            None => self.fallback.put(key, value, ttl).await,
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(Self::full_key(key));

        match self.run::<Option<String>>(&cmd).await {
            Some(reply) => Ok(reply?),
            None => self.fallback.get(key).await,
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(Self::full_key(key));

        match self.run::<()>(&cmd).await {
            Some(reply) => Ok(reply?),
            None => self.fallback.remove(key).await,
        }
    }
}
