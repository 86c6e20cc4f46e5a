//! Redis integration for unirank.
//!
//! - **Pub/Sub**: fans vote events out to every server instance and bridges
//!   them into the local invalidation bus
//! - **Progress cache**: Redis-backed progress mirror shared by all instances

pub mod progress_cache;
pub mod pubsub;

pub use progress_cache::RedisProgressCache;
pub use pubsub::{PubSubEvent, PubSubInvalidationBridge, RedisPubSub, channels as pubsub_channels};
