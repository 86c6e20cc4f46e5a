//! Event publisher service.
//!
//! Provides an abstraction for publishing vote events to other instances.
//! The actual implementation is provided by the pubsub crate (Redis Pub/Sub).

use async_trait::async_trait;
use unirank_common::AppResult;

/// Trait for publishing cross-instance vote events.
///
/// This allows the core services to publish events
/// without directly depending on the pubsub implementation.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish that a vote was appended to a poll.
    async fn publish_vote_cast(&self, poll_id: &str, option_id: &str) -> AppResult<()>;

    /// Publish that a poll was closed.
    async fn publish_poll_closed(&self, poll_id: &str) -> AppResult<()>;
}

/// A no-op implementation of `EventPublisher` for tests or single-instance deployments.
#[derive(Clone, Default)]
pub struct NoOpEventPublisher;

#[async_trait]
impl EventPublisher for NoOpEventPublisher {
    async fn publish_vote_cast(&self, _poll_id: &str, _option_id: &str) -> AppResult<()> {
        Ok(())
    }

    async fn publish_poll_closed(&self, _poll_id: &str) -> AppResult<()> {
        Ok(())
    }
}
