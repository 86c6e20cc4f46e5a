//! Poll management service.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use unirank_common::{AppError, AppResult, IdGenerator};
use unirank_db::entities::{poll, poll_option};
use unirank_db::repositories::PollFilter;
use validator::{Validate, ValidationError};

use super::event_publisher::EventPublisher;
use super::invalidation::{Invalidation, InvalidationBus};
use super::store::{PollSnapshot, PollStore};
use super::{Clock, system_clock};

/// Largest page returned by [`PollService::list_polls`].
const MAX_LIST_LIMIT: u64 = 100;
/// Minimum number of options a poll needs.
const MIN_OPTIONS: usize = 2;

/// Input for one option of a new poll.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOptionInput {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(length(min = 1, max = 16))]
    pub short_name: Option<String>,
    #[validate(custom(function = "validate_color"))]
    pub color: Option<String>,
}

/// Input for creating a poll.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollInput {
    #[validate(length(min = 1, max = 280))]
    pub question: String,
    #[validate(length(min = 1, max = 64))]
    pub category: String,
    /// Voting cycle (`YYYY-MM`); defaults to the current month.
    #[validate(custom(function = "validate_cycle"))]
    pub cycle: Option<String>,
    pub ends_at: Option<DateTime<Utc>>,
    #[validate(nested)]
    pub options: Vec<CreateOptionInput>,
}

fn validate_color(color: &str) -> Result<(), ValidationError> {
    let hex = color.strip_prefix('#').unwrap_or("");
    if hex.len() == 6 && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(ValidationError::new("color"))
    }
}

fn validate_cycle(cycle: &str) -> Result<(), ValidationError> {
    let well_formed = cycle.len() == 7
        && NaiveDate::parse_from_str(&format!("{cycle}-01"), "%Y-%m-%d").is_ok();
    if well_formed {
        Ok(())
    } else {
        Err(ValidationError::new("cycle"))
    }
}

/// Cycle containing `now`, e.g. `2026-10`.
#[must_use]
pub fn current_cycle(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// Service for creating, listing and closing polls.
#[derive(Clone)]
pub struct PollService {
    store: Arc<dyn PollStore>,
    bus: InvalidationBus,
    publisher: Arc<dyn EventPublisher>,
    id_gen: IdGenerator,
    max_options: usize,
    clock: Clock,
}

impl PollService {
    /// Create a new poll service.
    #[must_use]
    pub fn new(
        store: Arc<dyn PollStore>,
        bus: InvalidationBus,
        publisher: Arc<dyn EventPublisher>,
        max_options: usize,
    ) -> Self {
        Self {
            store,
            bus,
            publisher,
            id_gen: IdGenerator::new(),
            max_options,
            clock: system_clock(),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Create a poll with its options.
    pub async fn create_poll(&self, input: CreatePollInput) -> AppResult<PollSnapshot> {
        input.validate()?;

        let option_count = input.options.len();
        if !(MIN_OPTIONS..=self.max_options).contains(&option_count) {
            return Err(AppError::Validation(format!(
                "a poll needs between {MIN_OPTIONS} and {} options, got {option_count}",
                self.max_options
            )));
        }

        let mut seen = HashSet::new();
        for option in &input.options {
            if !seen.insert(option.name.trim().to_lowercase()) {
                return Err(AppError::Validation(format!(
                    "duplicate option name: {}",
                    option.name
                )));
            }
        }

        let now = (self.clock)();
        if input.ends_at.is_some_and(|ends| ends <= now) {
            return Err(AppError::Validation("endsAt must be in the future".to_string()));
        }

        let poll_id = self.id_gen.generate();
        let poll = poll::Model {
            id: poll_id.clone(),
            question: input.question.trim().to_string(),
            category: input.category.trim().to_string(),
            cycle: input.cycle.unwrap_or_else(|| current_cycle(now)),
            is_active: true,
            ends_at: input.ends_at.map(Into::into),
            created_at: now.into(),
        };
        let options = input
            .options
            .into_iter()
            .enumerate()
            .map(|(position, option)| poll_option::Model {
                id: self.id_gen.option_id(&poll_id, position),
                poll_id: poll_id.clone(),
                name: option.name.trim().to_string(),
                short_name: option.short_name,
                color: option.color.map(|c| c.to_lowercase()),
                position: position as i32,
            })
            .collect();

        let snapshot = self.store.create_poll(poll, options).await?;
        info!(
            poll_id = %snapshot.poll.id,
            category = %snapshot.poll.category,
            options = snapshot.options.len(),
            "Poll created"
        );
        Ok(snapshot)
    }

    /// Get a poll with its options.
    pub async fn get_poll(&self, poll_id: &str) -> AppResult<PollSnapshot> {
        self.store
            .find_poll(poll_id)
            .await?
            .ok_or_else(|| AppError::PollNotFound(poll_id.to_string()))
    }

    /// List polls, newest first. `limit` is clamped to 1..=100.
    pub async fn list_polls(&self, filter: &PollFilter, limit: u64) -> AppResult<Vec<poll::Model>> {
        self.store
            .list_polls(filter, limit.clamp(1, MAX_LIST_LIMIT))
            .await
    }

    /// Stop accepting votes on a poll.
    pub async fn close_poll(&self, poll_id: &str) -> AppResult<poll::Model> {
        let poll = self.store.set_poll_active(poll_id, false).await?;
        info!(poll_id = %poll_id, "Poll closed");

        self.bus
            .invalidate(Invalidation::PollClosed {
                poll_id: poll_id.to_string(),
            })
            .await;
        if let Err(e) = self.publisher.publish_poll_closed(poll_id).await {
            warn!(poll_id = %poll_id, error = %e, "Failed to publish poll closed event");
        }

        Ok(poll)
    }
}
