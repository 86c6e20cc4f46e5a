//! Business logic services.

pub mod aggregator;
pub mod event_publisher;
pub mod gate;
pub mod identity;
pub mod invalidation;
pub mod ledger;
pub mod memory_store;
pub mod poll;
pub mod progress;
pub mod store;
pub mod sync;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use chrono::{DateTime, Utc};

pub use aggregator::{AggregatorService, OptionResult, PollResults, ResultsProvider, compute_results};
pub use event_publisher::{EventPublisher, NoOpEventPublisher};
pub use gate::{
    CategoryEvidence, CategoryGate, GateController, GateService, GateState, GateTarget,
    PollEvidence, PollGate,
};
pub use identity::{
    DeviceSignals, FallbackSignals, Identity, IdentityCache, IdentityService, MemoryIdentityCache,
    SignalSource,
};
pub use invalidation::{Invalidation, InvalidationBus, Subscription, SubscriptionHandle};
pub use ledger::{LedgerService, VoteError, VoteReceipt};
pub use memory_store::MemoryPollStore;
pub use poll::{CreateOptionInput, CreatePollInput, PollService, current_cycle};
pub use progress::{
    JsonFileProgressStore, LocalProgress, MemoryProgressStore, ProgressEntry, ProgressStore,
};
pub use store::{DatabasePollStore, PollSnapshot, PollStore};
pub use sync::{RealtimeSynchronizer, SyncConfig};
pub use unirank_common::config::CategoryGatePolicy;

/// Source of the current time, injectable for tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Clock backed by the system time.
#[must_use]
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}
