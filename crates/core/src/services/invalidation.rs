//! Per-poll invalidation channels.
//!
//! Every poll gets its own broadcast channel, created lazily on first
//! subscription, so there is no lock shared by the hot path of different polls
//! beyond the channel map itself. Delivery is at-least-once: a lagging
//! subscriber observes the overflow as one more invalidation, and consumers are
//! expected to debounce.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Channel capacity per poll.
const CHANNEL_CAPACITY: usize = 256;

/// Why a poll's results became stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Invalidation {
    /// A vote was appended.
    #[serde(rename_all = "camelCase")]
    VoteCast {
        /// Poll the vote belongs to.
        poll_id: String,
        /// Option voted for.
        option_id: String,
    },
    /// The poll was closed.
    #[serde(rename_all = "camelCase")]
    PollClosed {
        /// Closed poll.
        poll_id: String,
    },
    /// Some notifications were dropped; treat as stale.
    #[serde(rename_all = "camelCase")]
    Lagged {
        /// Poll the subscriber is attached to.
        poll_id: String,
        /// Number of skipped notifications.
        skipped: u64,
    },
}

impl Invalidation {
    /// Poll this invalidation applies to.
    #[must_use]
    pub fn poll_id(&self) -> &str {
        match self {
            Self::VoteCast { poll_id, .. }
            | Self::PollClosed { poll_id }
            | Self::Lagged { poll_id, .. } => poll_id,
        }
    }
}

/// Process-local fan-out of poll invalidations.
#[derive(Clone, Default)]
pub struct InvalidationBus {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<Invalidation>>>>,
}

impl InvalidationBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to invalidations of one poll.
    pub async fn subscribe(&self, poll_id: &str) -> Subscription {
        let mut channels = self.channels.write().await;
        let sender = channels
            .entry(poll_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);

        debug!(poll_id = %poll_id, "Subscribed to poll invalidations");
        Subscription {
            poll_id: poll_id.to_string(),
            receiver: sender.subscribe(),
        }
    }

    /// Notify every subscriber of the invalidation's poll.
    ///
    /// Returns the number of subscribers reached; zero when nobody listens.
    pub async fn invalidate(&self, invalidation: Invalidation) -> usize {
        let channels = self.channels.read().await;
        let Some(sender) = channels.get(invalidation.poll_id()) else {
            return 0;
        };

        trace!(poll_id = %invalidation.poll_id(), "Invalidating poll");
        sender.send(invalidation).unwrap_or(0)
    }

    /// Run `on_invalidate` for every invalidation of a poll until the returned
    /// handle is dropped or unsubscribed.
    pub async fn watch<F, Fut>(&self, poll_id: &str, mut on_invalidate: F) -> SubscriptionHandle
    where
        F: FnMut(Invalidation) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut subscription = self.subscribe(poll_id).await;
        let task = tokio::spawn(async move {
            while let Some(invalidation) = subscription.recv().await {
                on_invalidate(invalidation).await;
            }
        });

        SubscriptionHandle {
            poll_id: poll_id.to_string(),
            task,
        }
    }

    /// Number of live subscribers for a poll.
    pub async fn subscriber_count(&self, poll_id: &str) -> usize {
        self.channels
            .read()
            .await
            .get(poll_id)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Drop channels that have no subscribers left.
    pub async fn cleanup(&self) {
        let mut channels = self.channels.write().await;
        let before = channels.len();
        channels.retain(|_, sender| sender.receiver_count() > 0);

        let removed = before - channels.len();
        if removed > 0 {
            debug!(removed, "Cleaned up idle invalidation channels");
        }
    }
}

/// Receiver side of one poll's invalidation channel.
pub struct Subscription {
    poll_id: String,
    receiver: broadcast::Receiver<Invalidation>,
}

impl Subscription {
    /// Poll this subscription is attached to.
    #[must_use]
    pub fn poll_id(&self) -> &str {
        &self.poll_id
    }

    /// Wait for the next invalidation; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Invalidation> {
        match self.receiver.recv().await {
            Ok(invalidation) => Some(invalidation),
            Err(broadcast::error::RecvError::Lagged(skipped)) => Some(Invalidation::Lagged {
                poll_id: self.poll_id.clone(),
                skipped,
            }),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

/// Unsubscribe handle returned by [`InvalidationBus::watch`].
///
/// Dropping the handle unsubscribes as well.
pub struct SubscriptionHandle {
    poll_id: String,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Stop delivering invalidations.
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Whether the callback task is still attached.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
        debug!(poll_id = %self.poll_id, "Unsubscribed from poll invalidations");
    }
}
