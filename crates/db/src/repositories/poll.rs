//! Poll repository.

use std::sync::Arc;

use crate::entities::{Poll, PollOption, poll, poll_option};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use unirank_common::{AppError, AppResult};

/// Listing filter for polls.
#[derive(Debug, Clone, Default)]
pub struct PollFilter {
    /// Only polls of this category.
    pub category: Option<String>,
    /// Only polls of this cycle.
    pub cycle: Option<String>,
    /// Skip deactivated polls.
    pub active_only: bool,
}

/// Poll repository for database operations.
#[derive(Clone)]
pub struct PollRepository {
    db: Arc<DatabaseConnection>,
}

impl PollRepository {
    /// Create a new poll repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a poll by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<poll::Model>> {
        Poll::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get a poll by ID, returning error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<poll::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::PollNotFound(id.to_string()))
    }

    /// Get the option set of a poll in display order.
    pub async fn find_options(&self, poll_id: &str) -> AppResult<Vec<poll_option::Model>> {
        PollOption::find()
            .filter(poll_option::Column::PollId.eq(poll_id))
            .order_by_asc(poll_option::Column::Position)
            .order_by_asc(poll_option::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a poll together with its options in one transaction.
    pub async fn create_with_options(
        &self,
        poll: poll::ActiveModel,
        options: Vec<poll_option::ActiveModel>,
    ) -> AppResult<(poll::Model, Vec<poll_option::Model>)> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let poll = poll
            .insert(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let mut created = Vec::with_capacity(options.len());
        for option in options {
            created.push(
                option
                    .insert(&txn)
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?,
            );
        }

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok((poll, created))
    }

    /// List polls, newest first.
    pub async fn find_filtered(
        &self,
        filter: &PollFilter,
        limit: u64,
    ) -> AppResult<Vec<poll::Model>> {
        let mut query = Poll::find()
            .order_by_desc(poll::Column::CreatedAt)
            .order_by_desc(poll::Column::Id);

        if let Some(category) = &filter.category {
            query = query.filter(poll::Column::Category.eq(category.as_str()));
        }
        if let Some(cycle) = &filter.cycle {
            query = query.filter(poll::Column::Cycle.eq(cycle.as_str()));
        }
        if filter.active_only {
            query = query.filter(poll::Column::IsActive.eq(true));
        }

        query
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// IDs of every poll in a category.
    pub async fn find_ids_by_category(&self, category: &str) -> AppResult<Vec<String>> {
        let polls = Poll::find()
            .filter(poll::Column::Category.eq(category))
            .order_by_asc(poll::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(polls.into_iter().map(|p| p.id).collect())
    }

    /// Set the active flag of a poll.
    pub async fn set_active(&self, id: &str, is_active: bool) -> AppResult<poll::Model> {
        let poll = self.get_by_id(id).await?;
        let mut active: poll::ActiveModel = poll.into();
        active.is_active = Set(is_active);
        active
            .update(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
