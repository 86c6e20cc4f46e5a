//! Per-identity progress mirror.
//!
//! The mirror records which polls an identity has voted in so the gate can
//! answer without a ledger round-trip. It is eventually consistent: the
//! ledger wins on conflict and the mirror is repaired from it.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use unirank_common::{AppError, AppResult};
use unirank_db::entities::vote;

use super::identity::{Identity, IdentityCache};

/// One voted poll in a progress record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEntry {
    /// Option the identity voted for.
    pub option_id: String,
    /// When the vote was recorded.
    pub voted_at: DateTime<Utc>,
}

/// Progress record in the persisted local format:
/// `{ identity, votes: { [pollId]: { optionId, votedAt } } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalProgress {
    /// Owner of the record.
    pub identity: Identity,
    /// Voted polls keyed by poll ID.
    #[serde(default)]
    pub votes: BTreeMap<String, ProgressEntry>,
}

impl LocalProgress {
    /// An empty record for an identity.
    #[must_use]
    pub const fn new(identity: Identity) -> Self {
        Self {
            identity,
            votes: BTreeMap::new(),
        }
    }

    /// Rebuild a record from ledger rows.
    #[must_use]
    pub fn from_votes(identity: Identity, votes: &[vote::Model]) -> Self {
        let mut progress = Self::new(identity);
        for vote in votes {
            progress.record(
                &vote.poll_id,
                ProgressEntry {
                    option_id: vote.option_id.clone(),
                    voted_at: vote.created_at.with_timezone(&Utc),
                },
            );
        }
        progress
    }

    /// Whether the record lists a vote on the poll.
    #[must_use]
    pub fn has_voted(&self, poll_id: &str) -> bool {
        self.votes.contains_key(poll_id)
    }

    /// Record a vote. The first entry for a poll is kept; votes are immutable.
    pub fn record(&mut self, poll_id: &str, entry: ProgressEntry) {
        self.votes.entry(poll_id.to_string()).or_insert(entry);
    }

    /// Number of voted polls among `poll_ids`.
    #[must_use]
    pub fn voted_count(&self, poll_ids: &[String]) -> usize {
        poll_ids.iter().filter(|id| self.has_voted(id)).count()
    }
}

/// Storage for progress records.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// The identity's record; empty when nothing is stored.
    async fn load(&self, identity: &Identity) -> AppResult<LocalProgress>;

    /// Add one voted poll to the identity's record.
    async fn record(&self, identity: &Identity, poll_id: &str, entry: ProgressEntry)
    -> AppResult<()>;

    /// Replace the identity's record wholesale.
    async fn replace(&self, progress: LocalProgress) -> AppResult<()>;
}

/// [`ProgressStore`] kept in memory.
#[derive(Default)]
pub struct MemoryProgressStore {
    records: Mutex<HashMap<Identity, LocalProgress>>,
}

impl MemoryProgressStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_records<T>(
        &self,
        f: impl FnOnce(&mut HashMap<Identity, LocalProgress>) -> T,
    ) -> AppResult<T> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| AppError::Internal("progress store lock poisoned".to_string()))?;
        Ok(f(&mut records))
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn load(&self, identity: &Identity) -> AppResult<LocalProgress> {
        self.with_records(|records| {
            records
                .get(identity)
                .cloned()
                .unwrap_or_else(|| LocalProgress::new(identity.clone()))
        })
    }

    async fn record(
        &self,
        identity: &Identity,
        poll_id: &str,
        entry: ProgressEntry,
    ) -> AppResult<()> {
        self.with_records(|records| {
            records
                .entry(identity.clone())
                .or_insert_with(|| LocalProgress::new(identity.clone()))
                .record(poll_id, entry);
        })
    }

    async fn replace(&self, progress: LocalProgress) -> AppResult<()> {
        self.with_records(|records| {
            records.insert(progress.identity.clone(), progress);
        })
    }
}

/// Durable client-side progress file holding a single identity's record.
///
/// Doubles as the [`IdentityCache`] of that device. Writes go to a temporary
/// file first and are renamed into place.
pub struct JsonFileProgressStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileProgressStore {
    /// Use the progress file at `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Location of the progress file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> AppResult<Option<LocalProgress>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::Internal(format!("read progress file: {e}"))),
        };

        match serde_json::from_slice(&bytes) {
            Ok(progress) => Ok(Some(progress)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Discarding corrupt progress file");
                Ok(None)
            }
        }
    }

    async fn write(&self, progress: &LocalProgress) -> AppResult<()> {
        let json = serde_json::to_vec_pretty(progress)
            .map_err(|e| AppError::Internal(format!("encode progress: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| AppError::Internal(format!("write progress file: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| AppError::Internal(format!("replace progress file: {e}")))?;

        debug!(path = %self.path.display(), polls = progress.votes.len(), "Saved progress");
        Ok(())
    }

    /// Stored record if it belongs to `identity`.
    async fn read_for(&self, identity: &Identity) -> AppResult<LocalProgress> {
        Ok(self
            .read()
            .await?
            .filter(|p| p.identity == *identity)
            .unwrap_or_else(|| LocalProgress::new(identity.clone())))
    }
}

#[async_trait]
impl ProgressStore for JsonFileProgressStore {
    async fn load(&self, identity: &Identity) -> AppResult<LocalProgress> {
        self.read_for(identity).await
    }

    async fn record(
        &self,
        identity: &Identity,
        poll_id: &str,
        entry: ProgressEntry,
    ) -> AppResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut progress = self.read_for(identity).await?;
        progress.record(poll_id, entry);
        self.write(&progress).await
    }

    async fn replace(&self, progress: LocalProgress) -> AppResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write(&progress).await
    }
}

#[async_trait]
impl IdentityCache for JsonFileProgressStore {
    async fn load(&self) -> AppResult<Option<Identity>> {
        Ok(self.read().await?.map(|p| p.identity))
    }

    async fn store(&self, identity: &Identity) -> AppResult<()> {
        let _guard = self.write_lock.lock().await;
        let progress = self.read_for(identity).await?;
        self.write(&progress).await
    }
}
