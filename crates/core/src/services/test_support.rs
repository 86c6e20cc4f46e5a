//! Shared fixtures for service tests.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use unirank_common::{AppError, AppResult};
use unirank_db::entities::{poll, poll_option, vote};
use unirank_db::repositories::{PollFilter, TallyRow};

use super::identity::Identity;
use super::store::{PollSnapshot, PollStore};

/// Deterministic identity number `n`.
pub fn identity(n: u8) -> Identity {
    Identity::parse(&format!("v1-{}", format!("{n:02x}").repeat(16))).unwrap()
}

/// Fixed "now" used across service tests.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap()
}

/// An active, open-ended poll.
pub fn poll_model(id: &str, category: &str) -> poll::Model {
    poll::Model {
        id: id.to_string(),
        question: format!("Question {id}"),
        category: category.to_string(),
        cycle: "2026-10".to_string(),
        is_active: true,
        ends_at: None,
        created_at: now().into(),
    }
}

/// Options with the given IDs, in order.
pub fn options(poll_id: &str, ids: &[&str]) -> Vec<poll_option::Model> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| poll_option::Model {
            id: (*id).to_string(),
            poll_id: poll_id.to_string(),
            name: id.to_uppercase(),
            short_name: None,
            color: None,
            position: i as i32,
        })
        .collect()
}

/// Store whose every operation fails with a database error.
pub struct FailingStore;

fn down<T>() -> AppResult<T> {
    Err(AppError::Database("connection refused".to_string()))
}

#[async_trait]
impl PollStore for FailingStore {
    async fn create_poll(
        &self,
        _poll: poll::Model,
        _options: Vec<poll_option::Model>,
    ) -> AppResult<PollSnapshot> {
        down()
    }

    async fn find_poll(&self, _poll_id: &str) -> AppResult<Option<PollSnapshot>> {
        down()
    }

    async fn list_polls(&self, _filter: &PollFilter, _limit: u64) -> AppResult<Vec<poll::Model>> {
        down()
    }

    async fn poll_ids_in_category(&self, _category: &str) -> AppResult<Vec<String>> {
        down()
    }

    async fn set_poll_active(&self, _poll_id: &str, _is_active: bool) -> AppResult<poll::Model> {
        down()
    }

    async fn insert_vote(&self, _vote: vote::Model) -> AppResult<bool> {
        down()
    }

    async fn has_vote(&self, _poll_id: &str, _identity: &str) -> AppResult<bool> {
        down()
    }

    async fn find_vote(&self, _poll_id: &str, _identity: &str) -> AppResult<Option<vote::Model>> {
        down()
    }

    async fn tally(&self, _poll_id: &str) -> AppResult<Vec<TallyRow>> {
        down()
    }

    async fn votes_by_identity(&self, _identity: &str) -> AppResult<Vec<vote::Model>> {
        down()
    }
}
