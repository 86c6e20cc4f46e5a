//! Vote repository.
//!
//! Votes are append-only: there is no update or delete operation here.

use std::sync::Arc;

use crate::entities::{Vote, vote};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, FromQueryResult, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, SqlErr,
};
use unirank_common::{AppError, AppResult};

/// One row of a per-option tally.
///
/// Fields are optional because rows come from an aggregate query and are
/// validated before they reach a result set.
#[derive(Debug, Clone, PartialEq, Eq, FromQueryResult)]
pub struct TallyRow {
    /// Option the votes were cast for.
    pub option_id: Option<String>,
    /// Number of votes for the option.
    pub vote_count: Option<i64>,
}

impl TallyRow {
    /// Create a well-formed tally row.
    #[must_use]
    pub fn new(option_id: impl Into<String>, vote_count: i64) -> Self {
        Self {
            option_id: Some(option_id.into()),
            vote_count: Some(vote_count),
        }
    }
}

/// Vote repository for database operations.
#[derive(Clone)]
pub struct VoteRepository {
    db: Arc<DatabaseConnection>,
}

impl VoteRepository {
    /// Create a new vote repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Append a vote unless the identity already voted on the poll.
    ///
    /// Returns `false` when the `(poll_id, identity)` unique index rejected
    /// the row. The check and the write are a single statement, so concurrent
    /// duplicates cannot both succeed.
    pub async fn insert_if_absent(&self, model: vote::ActiveModel) -> AppResult<bool> {
        let result = Vote::insert(model)
            .on_conflict(
                OnConflict::columns([vote::Column::PollId, vote::Column::Identity])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await;

        match result {
            Ok(rows_affected) => Ok(rows_affected > 0),
            Err(e) => match e.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => Ok(false),
                _ => Err(AppError::Database(e.to_string())),
            },
        }
    }

    /// Check if an identity has voted on a poll.
    pub async fn has_voted(&self, poll_id: &str, identity: &str) -> AppResult<bool> {
        let count = Vote::find()
            .filter(vote::Column::PollId.eq(poll_id))
            .filter(vote::Column::Identity.eq(identity))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(count > 0)
    }

    /// Find the vote an identity cast on a poll.
    pub async fn find_by_poll_and_identity(
        &self,
        poll_id: &str,
        identity: &str,
    ) -> AppResult<Option<vote::Model>> {
        Vote::find()
            .filter(vote::Column::PollId.eq(poll_id))
            .filter(vote::Column::Identity.eq(identity))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Every vote cast by an identity, oldest first.
    pub async fn find_by_identity(&self, identity: &str) -> AppResult<Vec<vote::Model>> {
        Vote::find()
            .filter(vote::Column::Identity.eq(identity))
            .order_by_asc(vote::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Per-option vote counts of a poll.
    pub async fn tally_by_poll(&self, poll_id: &str) -> AppResult<Vec<TallyRow>> {
        Vote::find()
            .select_only()
            .column(vote::Column::OptionId)
            .column_as(Expr::col(vote::Column::Id).count(), "vote_count")
            .filter(vote::Column::PollId.eq(poll_id))
            .group_by(vote::Column::OptionId)
            .into_model::<TallyRow>()
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Count votes on a poll.
    pub async fn count_by_poll(&self, poll_id: &str) -> AppResult<u64> {
        Vote::find()
            .filter(vote::Column::PollId.eq(poll_id))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
