//! Redis Pub/Sub for cross-instance vote events.
//!
//! Every instance publishes the votes it records and subscribes to the votes
//! recorded elsewhere, so open result views everywhere are invalidated.
//! An instance also receives its own events back; invalidations are
//! at-least-once and debounced downstream, so the echo is harmless.

use std::sync::Arc;

use async_trait::async_trait;
use fred::clients::{Client, SubscriberClient};
use fred::error::{Error as RedisError, ErrorKind as RedisErrorKind};
use fred::interfaces::{ClientLike, EventInterface, PubsubInterface};
use fred::types::config::Config as RedisConfig;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use unirank_common::{AppError, AppResult};
use unirank_core::{EventPublisher, Invalidation, InvalidationBus};

/// Pub/Sub channel names.
pub mod channels {
    /// Vote and poll lifecycle events.
    pub const VOTES: &str = "unirank:votes";
}

/// Local fan-out capacity for events received from Redis.
const LOCAL_CHANNEL_CAPACITY: usize = 1000;

/// Pub/Sub event types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PubSubEvent {
    /// A vote was recorded.
    #[serde(rename_all = "camelCase")]
    VoteCast {
        /// Poll voted on.
        poll_id: String,
        /// Option voted for.
        option_id: String,
    },
    /// A poll stopped accepting votes.
    #[serde(rename_all = "camelCase")]
    PollClosed {
        /// Closed poll.
        poll_id: String,
    },
}

impl From<PubSubEvent> for Invalidation {
    fn from(event: PubSubEvent) -> Self {
        match event {
            PubSubEvent::VoteCast { poll_id, option_id } => Self::VoteCast { poll_id, option_id },
            PubSubEvent::PollClosed { poll_id } => Self::PollClosed { poll_id },
        }
    }
}

/// Redis Pub/Sub manager for vote events.
#[derive(Clone)]
pub struct RedisPubSub {
    publisher: Client,
    subscriber: SubscriberClient,
    /// Local broadcast channel for events received from Redis.
    local_tx: broadcast::Sender<PubSubEvent>,
}

impl RedisPubSub {
    /// Connect the publishing and subscribing clients.
    pub async fn new(redis_url: &str) -> Result<Self, RedisError> {
        let config = RedisConfig::from_url(redis_url)?;

        let publisher = Client::new(config.clone(), None, None, None);
        publisher.init().await?;

        let subscriber = SubscriberClient::new(config, None, None, None);
        subscriber.init().await?;

        let (local_tx, _) = broadcast::channel(LOCAL_CHANNEL_CAPACITY);

        info!("Redis Pub/Sub initialized");

        Ok(Self {
            publisher,
            subscriber,
            local_tx,
        })
    }

    /// The publishing client, shared with other Redis users.
    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.publisher
    }

    /// Subscribe to the vote channel and start the receive loop.
    pub async fn start(&self) -> Result<(), RedisError> {
        self.subscriber.subscribe(channels::VOTES).await?;
        info!(channel = channels::VOTES, "Subscribed to Redis Pub/Sub channel");

        let local_tx = self.local_tx.clone();
        let mut message_stream = self.subscriber.message_rx();

        tokio::spawn(async move {
            while let Ok(message) = message_stream.recv().await {
                let Some(payload) = message.value.as_string() else {
                    continue;
                };
                match serde_json::from_str::<PubSubEvent>(&payload) {
                    Ok(event) => {
                        debug!(?event, "Received Pub/Sub event");
                        if local_tx.send(event).is_err() {
                            debug!("No local subscribers for Pub/Sub event");
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to parse Pub/Sub message"),
                }
            }
            info!("Pub/Sub message stream ended");
        });

        Ok(())
    }

    /// Publish an event to a channel.
    pub async fn publish(&self, channel: &str, event: &PubSubEvent) -> Result<(), RedisError> {
        let payload = serde_json::to_string(event).map_err(|e| {
            RedisError::new(
                RedisErrorKind::InvalidArgument,
                format!("Serialization error: {e}"),
            )
        })?;
        let _: () = self.publisher.publish(channel, payload).await?;
        debug!(channel, ?event, "Published Pub/Sub event");
        Ok(())
    }

    /// Get a receiver for events received from Redis.
    #[must_use]
    pub fn subscribe_local(&self) -> broadcast::Receiver<PubSubEvent> {
        self.local_tx.subscribe()
    }

    /// Disconnect both clients.
    pub async fn shutdown(&self) -> Result<(), RedisError> {
        self.subscriber.quit().await?;
        self.publisher.quit().await?;
        info!("Redis Pub/Sub shut down");
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for RedisPubSub {
    async fn publish_vote_cast(&self, poll_id: &str, option_id: &str) -> AppResult<()> {
        let event = PubSubEvent::VoteCast {
            poll_id: poll_id.to_string(),
            option_id: option_id.to_string(),
        };
        self.publish(channels::VOTES, &event)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))
    }

    async fn publish_poll_closed(&self, poll_id: &str) -> AppResult<()> {
        let event = PubSubEvent::PollClosed {
            poll_id: poll_id.to_string(),
        };
        self.publish(channels::VOTES, &event)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))
    }
}

/// Forwards events received from Redis into the local invalidation bus.
pub struct PubSubInvalidationBridge {
    events: broadcast::Receiver<PubSubEvent>,
    bus: InvalidationBus,
}

impl PubSubInvalidationBridge {
    /// Bridge the events of `pubsub` into `bus`.
    #[must_use]
    pub fn new(pubsub: &RedisPubSub, bus: InvalidationBus) -> Self {
        Self::from_receiver(pubsub.subscribe_local(), bus)
    }

    /// Bridge an arbitrary event receiver into `bus`.
    #[must_use]
    pub const fn from_receiver(events: broadcast::Receiver<PubSubEvent>, bus: InvalidationBus) -> Self {
        Self { events, bus }
    }

    /// Start forwarding until the event channel closes.
    pub fn start(self) -> JoinHandle<()> {
        let Self { mut events, bus } = self;

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        bus.invalidate(event.into()).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Invalidation bridge lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Invalidation bridge channel closed");
                        break;
                    }
                }
            }
        })
    }
}

/// Shared handle type used by the server.
pub type SharedPubSub = Arc<RedisPubSub>;
