//! Progress mirror cached in Redis.
//!
//! Shares each identity's progress record between server instances. Entries
//! expire after a TTL; an expired or lost record is rebuilt from the ledger on
//! the next lookup miss, so the cache never has to be authoritative.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fred::clients::Client as RedisClient;
use fred::interfaces::KeysInterface;
use fred::types::Expiration;
use tracing::debug;
use unirank_common::{AppError, AppResult};
use unirank_core::{Identity, LocalProgress, ProgressEntry, ProgressStore};

/// Default record TTL: 7 days.
const DEFAULT_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// [`ProgressStore`] backed by Redis.
#[derive(Clone)]
pub struct RedisProgressCache {
    redis: Arc<RedisClient>,
    prefix: String,
    ttl_secs: i64,
}

impl RedisProgressCache {
    /// Create a cache with the default TTL.
    #[must_use]
    pub fn new(redis: Arc<RedisClient>, prefix: impl Into<String>) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
            ttl_secs: DEFAULT_TTL_SECS,
        }
    }

    /// Create a cache with a custom TTL.
    #[must_use]
    pub fn with_ttl(redis: Arc<RedisClient>, prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
            ttl_secs: ttl.as_secs() as i64,
        }
    }

    /// Cache key of an identity's record.
    fn cache_key(&self, identity: &Identity) -> String {
        format!("{}:progress:{identity}", self.prefix)
    }

    async fn write(&self, progress: &LocalProgress) -> AppResult<()> {
        let key = self.cache_key(&progress.identity);
        let json = serde_json::to_string(progress)
            .map_err(|e| AppError::Internal(format!("encode progress: {e}")))?;

        self.redis
            .set::<(), _, _>(key, json, Some(Expiration::EX(self.ttl_secs)), None, false)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        debug!(polls = progress.votes.len(), "Cached progress record");
        Ok(())
    }
}

#[async_trait]
impl ProgressStore for RedisProgressCache {
    async fn load(&self, identity: &Identity) -> AppResult<LocalProgress> {
        let cached: Option<String> = self
            .redis
            .get(self.cache_key(identity))
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        let Some(json) = cached else {
            return Ok(LocalProgress::new(identity.clone()));
        };
        match serde_json::from_str::<LocalProgress>(&json) {
            Ok(progress) if progress.identity == *identity => Ok(progress),
            Ok(_) | Err(_) => {
                debug!("Ignoring unusable cached progress record");
                Ok(LocalProgress::new(identity.clone()))
            }
        }
    }

    /// Read-modify-write. Two racing writers can drop an entry; the ledger
    /// fallback in the gate repairs it on the next lookup.
    async fn record(
        &self,
        identity: &Identity,
        poll_id: &str,
        entry: ProgressEntry,
    ) -> AppResult<()> {
        let mut progress = self.load(identity).await?;
        if progress.has_voted(poll_id) {
            return Ok(());
        }
        progress.record(poll_id, entry);
        self.write(&progress).await
    }

    async fn replace(&self, progress: LocalProgress) -> AppResult<()> {
        self.write(&progress).await
    }
}
