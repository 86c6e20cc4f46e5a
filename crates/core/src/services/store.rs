//! Storage seam for polls and the vote ledger.
//!
//! Services only talk to [`PollStore`]. The database driver below maps it onto
//! the repositories; [`crate::MemoryPollStore`] is the in-process driver.

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, Set};
use unirank_common::AppResult;
use unirank_db::{
    entities::{poll, poll_option, vote},
    repositories::{PollFilter, PollRepository, TallyRow, VoteRepository},
};

/// A poll together with its option set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSnapshot {
    /// The poll row.
    pub poll: poll::Model,
    /// Options in display order.
    pub options: Vec<poll_option::Model>,
}

impl PollSnapshot {
    /// Look up an option of this poll.
    #[must_use]
    pub fn option(&self, option_id: &str) -> Option<&poll_option::Model> {
        self.options.iter().find(|o| o.id == option_id)
    }

    /// Whether the poll has anything to vote on.
    #[must_use]
    pub fn has_options(&self) -> bool {
        !self.options.is_empty()
    }
}

/// Persistence for polls, options and votes.
///
/// `insert_vote` must be atomic with respect to `(poll_id, identity)`: of any
/// number of concurrent inserts for the same pair, exactly one returns `true`.
/// There is deliberately no way to update or delete a vote.
#[async_trait]
pub trait PollStore: Send + Sync {
    /// Persist a new poll and its options.
    async fn create_poll(
        &self,
        poll: poll::Model,
        options: Vec<poll_option::Model>,
    ) -> AppResult<PollSnapshot>;

    /// Load a poll with its options.
    async fn find_poll(&self, poll_id: &str) -> AppResult<Option<PollSnapshot>>;

    /// List polls, newest first.
    async fn list_polls(&self, filter: &PollFilter, limit: u64) -> AppResult<Vec<poll::Model>>;

    /// IDs of every poll in a category.
    async fn poll_ids_in_category(&self, category: &str) -> AppResult<Vec<String>>;

    /// Set the active flag of a poll.
    async fn set_poll_active(&self, poll_id: &str, is_active: bool) -> AppResult<poll::Model>;

    /// Append a vote; `false` if the identity already voted on the poll.
    async fn insert_vote(&self, vote: vote::Model) -> AppResult<bool>;

    /// Whether the identity voted on the poll.
    async fn has_vote(&self, poll_id: &str, identity: &str) -> AppResult<bool>;

    /// The vote the identity cast on the poll, if any.
    async fn find_vote(&self, poll_id: &str, identity: &str) -> AppResult<Option<vote::Model>>;

    /// Per-option vote counts of a poll.
    async fn tally(&self, poll_id: &str) -> AppResult<Vec<TallyRow>>;

    /// Every vote cast by an identity.
    async fn votes_by_identity(&self, identity: &str) -> AppResult<Vec<vote::Model>>;
}

/// [`PollStore`] backed by `PostgreSQL`.
#[derive(Clone)]
pub struct DatabasePollStore {
    poll_repo: PollRepository,
    vote_repo: VoteRepository,
}

impl DatabasePollStore {
    /// Create a database-backed store.
    #[must_use]
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            poll_repo: PollRepository::new(Arc::clone(&db)),
            vote_repo: VoteRepository::new(db),
        }
    }
}

fn poll_active_model(poll: poll::Model) -> poll::ActiveModel {
    poll::ActiveModel {
        id: Set(poll.id),
        question: Set(poll.question),
        category: Set(poll.category),
        cycle: Set(poll.cycle),
        is_active: Set(poll.is_active),
        ends_at: Set(poll.ends_at),
        created_at: Set(poll.created_at),
    }
}

fn option_active_model(option: poll_option::Model) -> poll_option::ActiveModel {
    poll_option::ActiveModel {
        id: Set(option.id),
        poll_id: Set(option.poll_id),
        name: Set(option.name),
        short_name: Set(option.short_name),
        color: Set(option.color),
        position: Set(option.position),
    }
}

fn vote_active_model(vote: vote::Model) -> vote::ActiveModel {
    vote::ActiveModel {
        id: Set(vote.id),
        poll_id: Set(vote.poll_id),
        option_id: Set(vote.option_id),
        identity: Set(vote.identity),
        created_at: Set(vote.created_at),
    }
}

#[async_trait]
impl PollStore for DatabasePollStore {
    async fn create_poll(
        &self,
        poll: poll::Model,
        options: Vec<poll_option::Model>,
    ) -> AppResult<PollSnapshot> {
        let (poll, options) = self
            .poll_repo
            .create_with_options(
                poll_active_model(poll),
                options.into_iter().map(option_active_model).collect(),
            )
            .await?;
        Ok(PollSnapshot { poll, options })
    }

    async fn find_poll(&self, poll_id: &str) -> AppResult<Option<PollSnapshot>> {
        let Some(poll) = self.poll_repo.find_by_id(poll_id).await? else {
            return Ok(None);
        };
        let options = self.poll_repo.find_options(poll_id).await?;
        Ok(Some(PollSnapshot { poll, options }))
    }

    async fn list_polls(&self, filter: &PollFilter, limit: u64) -> AppResult<Vec<poll::Model>> {
        self.poll_repo.find_filtered(filter, limit).await
    }

    async fn poll_ids_in_category(&self, category: &str) -> AppResult<Vec<String>> {
        self.poll_repo.find_ids_by_category(category).await
    }

    async fn set_poll_active(&self, poll_id: &str, is_active: bool) -> AppResult<poll::Model> {
        self.poll_repo.set_active(poll_id, is_active).await
    }

    async fn insert_vote(&self, vote: vote::Model) -> AppResult<bool> {
        self.vote_repo
            .insert_if_absent(vote_active_model(vote))
            .await
    }

    async fn has_vote(&self, poll_id: &str, identity: &str) -> AppResult<bool> {
        self.vote_repo.has_voted(poll_id, identity).await
    }

    async fn find_vote(&self, poll_id: &str, identity: &str) -> AppResult<Option<vote::Model>> {
        self.vote_repo
            .find_by_poll_and_identity(poll_id, identity)
            .await
    }

    async fn tally(&self, poll_id: &str) -> AppResult<Vec<TallyRow>> {
        self.vote_repo.tally_by_poll(poll_id).await
    }

    async fn votes_by_identity(&self, identity: &str) -> AppResult<Vec<vote::Model>> {
        self.vote_repo.find_by_identity(identity).await
    }
}
