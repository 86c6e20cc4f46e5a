//! Vote ledger service.
//!
//! The ledger is the single source of truth for "has this identity voted".
//! Uniqueness of `(poll_id, identity)` is enforced by the store in the same
//! operation that writes the row; nothing here checks before writing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use unirank_common::{AppError, IdGenerator};
use unirank_db::entities::vote;

use super::event_publisher::EventPublisher;
use super::identity::Identity;
use super::invalidation::{Invalidation, InvalidationBus};
use super::progress::{ProgressEntry, ProgressStore};
use super::store::PollStore;
use super::{Clock, system_clock};

/// Why a vote was not recorded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoteError {
    /// The identity already voted on this poll. Expected and non-fatal.
    #[error("already voted on poll {poll_id}")]
    AlreadyVoted {
        /// Poll that was voted on.
        poll_id: String,
    },

    /// The vote references something that does not accept it.
    #[error("invalid vote: {0}")]
    Invalid(String),

    /// The ledger could not be reached or written.
    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl VoteError {
    /// Whether the caller should offer a retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageFailure(_))
    }
}

impl From<AppError> for VoteError {
    fn from(e: AppError) -> Self {
        if e.is_retryable() || e.is_server_error() {
            Self::StorageFailure(e.to_string())
        } else {
            Self::Invalid(e.to_string())
        }
    }
}

/// Proof of a recorded vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    /// ID of the new vote row.
    pub vote_id: String,
    /// Poll voted on.
    pub poll_id: String,
    /// Option chosen.
    pub option_id: String,
    /// Voter.
    pub identity: Identity,
    /// When the vote was recorded.
    pub created_at: DateTime<Utc>,
}

/// Append-only vote ledger.
#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn PollStore>,
    bus: InvalidationBus,
    publisher: Arc<dyn EventPublisher>,
    progress: Arc<dyn ProgressStore>,
    id_gen: IdGenerator,
    clock: Clock,
}

impl LedgerService {
    /// Create a new ledger service.
    #[must_use]
    pub fn new(
        store: Arc<dyn PollStore>,
        bus: InvalidationBus,
        publisher: Arc<dyn EventPublisher>,
        progress: Arc<dyn ProgressStore>,
    ) -> Self {
        Self {
            store,
            bus,
            publisher,
            progress,
            id_gen: IdGenerator::new(),
            clock: system_clock(),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Cast a vote.
    ///
    /// On success exactly one vote row is appended, the poll's results are
    /// invalidated and the identity's progress mirror is updated. A duplicate
    /// yields [`VoteError::AlreadyVoted`] and repairs the mirror instead.
    pub async fn cast_vote(
        &self,
        poll_id: &str,
        option_id: &str,
        identity: &Identity,
    ) -> Result<VoteReceipt, VoteError> {
        if identity.as_str().is_empty() {
            return Err(VoteError::Invalid("missing voter identity".to_string()));
        }

        let now = (self.clock)();
        let snapshot = self
            .store
            .find_poll(poll_id)
            .await?
            .ok_or_else(|| VoteError::Invalid(format!("unknown poll {poll_id}")))?;

        if !snapshot.poll.is_open_at(now) {
            return Err(self
                .reject(poll_id, identity, format!("poll {poll_id} is closed"))
                .await);
        }
        if snapshot.option(option_id).is_none() {
            return Err(self
                .reject(
                    poll_id,
                    identity,
                    format!("option {option_id} does not belong to poll {poll_id}"),
                )
                .await);
        }

        let row = vote::Model {
            id: self.id_gen.generate(),
            poll_id: poll_id.to_string(),
            option_id: option_id.to_string(),
            identity: identity.as_str().to_string(),
            created_at: now.into(),
        };
        let vote_id = row.id.clone();

        if !self.store.insert_vote(row).await? {
            debug!(poll_id = %poll_id, identity = %identity, "Duplicate vote rejected");
            self.repair_progress(poll_id, identity).await;
            return Err(VoteError::AlreadyVoted {
                poll_id: poll_id.to_string(),
            });
        }

        info!(poll_id = %poll_id, option_id = %option_id, vote_id = %vote_id, "Vote recorded");

        self.bus
            .invalidate(Invalidation::VoteCast {
                poll_id: poll_id.to_string(),
                option_id: option_id.to_string(),
            })
            .await;
        if let Err(e) = self.publisher.publish_vote_cast(poll_id, option_id).await {
            warn!(poll_id = %poll_id, error = %e, "Failed to publish vote event");
        }

        let entry = ProgressEntry {
            option_id: option_id.to_string(),
            voted_at: now,
        };
        if let Err(e) = self.progress.record(identity, poll_id, entry).await {
            warn!(poll_id = %poll_id, error = %e, "Failed to update progress mirror");
        }

        Ok(VoteReceipt {
            vote_id,
            poll_id: poll_id.to_string(),
            option_id: option_id.to_string(),
            identity: identity.clone(),
            created_at: now,
        })
    }

    /// Rejection for a vote that cannot be cast on an existing poll.
    ///
    /// A resubmission by an identity that already voted stays `AlreadyVoted`
    /// even after the poll closed.
    async fn reject(&self, poll_id: &str, identity: &Identity, reason: String) -> VoteError {
        match self.store.find_vote(poll_id, identity.as_str()).await {
            Ok(Some(_)) => {
                self.repair_progress(poll_id, identity).await;
                VoteError::AlreadyVoted {
                    poll_id: poll_id.to_string(),
                }
            }
            Ok(None) => VoteError::Invalid(reason),
            Err(e) => VoteError::from(e),
        }
    }

    async fn repair_progress(&self, poll_id: &str, identity: &Identity) {
        let existing = match self.store.find_vote(poll_id, identity.as_str()).await {
            Ok(Some(vote)) => vote,
            Ok(None) => return,
            Err(e) => {
                warn!(poll_id = %poll_id, error = %e, "Failed to load existing vote");
                return;
            }
        };

        let entry = ProgressEntry {
            option_id: existing.option_id,
            voted_at: existing.created_at.with_timezone(&Utc),
        };
        if let Err(e) = self.progress.record(identity, poll_id, entry).await {
            warn!(poll_id = %poll_id, error = %e, "Failed to repair progress mirror");
        }
    }

    /// Whether the identity voted on the poll, according to the ledger.
    pub async fn has_voted(&self, poll_id: &str, identity: &Identity) -> Result<bool, VoteError> {
        Ok(self.store.has_vote(poll_id, identity.as_str()).await?)
    }

    /// The identity's vote on a poll.
    pub async fn find_vote(
        &self,
        poll_id: &str,
        identity: &Identity,
    ) -> Result<Option<vote::Model>, VoteError> {
        Ok(self.store.find_vote(poll_id, identity.as_str()).await?)
    }

    /// Every vote the identity has cast.
    pub async fn votes_by_identity(
        &self,
        identity: &Identity,
    ) -> Result<Vec<vote::Model>, VoteError> {
        Ok(self.store.votes_by_identity(identity.as_str()).await?)
    }
}
