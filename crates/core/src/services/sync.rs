//! Realtime result synchronization for one open result view.
//!
//! Each synchronizer owns a task that recomputes the poll's results on a
//! fixed interval and whenever the poll is invalidated. Invalidations arriving
//! within the debounce window are coalesced into a single recomputation.
//! Snapshots are published through a `watch` channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};
use unirank_common::config::VotingConfig;
use unirank_common::{RetryConfig, retry_with_backoff};

use super::aggregator::{PollResults, ResultsProvider};
use super::invalidation::{InvalidationBus, Subscription};

/// Shortest backstop pull interval a synchronizer runs with.
pub const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Timing of a synchronizer.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Backstop pull interval, at least [`MIN_SYNC_INTERVAL`].
    pub interval: Duration,
    /// Window in which invalidations are coalesced.
    pub debounce: Duration,
    /// Backoff for failed recomputations.
    pub retry: RetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from(&VotingConfig::default())
    }
}

impl From<&VotingConfig> for SyncConfig {
    fn from(config: &VotingConfig) -> Self {
        Self {
            interval: config.sync_interval(),
            debounce: config.debounce(),
            retry: RetryConfig::default(),
        }
    }
}

/// Latest results of a poll, if any were computed yet.
pub type Snapshot = Option<Arc<PollResults>>;

/// Keeps one poll's results fresh while its view is open.
///
/// Dropping the synchronizer (or calling [`Self::shutdown`]) unsubscribes,
/// stops the timer and cancels any in-flight computation.
pub struct RealtimeSynchronizer {
    poll_id: String,
    snapshots: watch::Receiver<Snapshot>,
    task: JoinHandle<()>,
}

impl RealtimeSynchronizer {
    /// Subscribe to the poll and start synchronizing.
    ///
    /// The first computation runs immediately.
    pub async fn start(
        poll_id: &str,
        provider: Arc<dyn ResultsProvider>,
        bus: &InvalidationBus,
        config: SyncConfig,
    ) -> Self {
        let subscription = bus.subscribe(poll_id).await;
        let (tx, rx) = watch::channel(None);

        let worker = SyncWorker {
            poll_id: poll_id.to_string(),
            provider,
            subscription,
            tx,
            config,
        };
        let task = tokio::spawn(worker.run());

        debug!(poll_id = %poll_id, "Started result synchronizer");
        Self {
            poll_id: poll_id.to_string(),
            snapshots: rx,
            task,
        }
    }

    /// Poll being synchronized.
    #[must_use]
    pub fn poll_id(&self) -> &str {
        &self.poll_id
    }

    /// A receiver of result snapshots.
    #[must_use]
    pub fn snapshots(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// Most recent snapshot.
    #[must_use]
    pub fn latest(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    /// Whether the background task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Tear the synchronizer down.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for RealtimeSynchronizer {
    fn drop(&mut self) {
        self.task.abort();
        debug!(poll_id = %self.poll_id, "Stopped result synchronizer");
    }
}

struct SyncWorker {
    poll_id: String,
    provider: Arc<dyn ResultsProvider>,
    subscription: Subscription,
    tx: watch::Sender<Snapshot>,
    config: SyncConfig,
}

impl SyncWorker {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.interval.max(MIN_SYNC_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut bus_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    trace!(poll_id = %self.poll_id, "Interval refresh");
                }
                () = self.tx.closed() => break,
                invalidation = self.subscription.recv(), if bus_open => {
                    if invalidation.is_none() {
                        bus_open = false;
                        continue;
                    }
                    bus_open = self.coalesce().await;
                    ticker.reset();
                }
            }

            self.refresh().await;
        }

        debug!(poll_id = %self.poll_id, "Result synchronizer finished");
    }

    /// Swallow invalidations until the debounce window closes.
    ///
    /// Returns whether the bus is still open.
    async fn coalesce(&mut self) -> bool {
        let deadline = Instant::now() + self.config.debounce;
        let mut coalesced = 0u32;

        loop {
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => break,
                more = self.subscription.recv() => {
                    if more.is_none() {
                        return false;
                    }
                    coalesced += 1;
                }
            }
        }

        if coalesced > 0 {
            trace!(poll_id = %self.poll_id, coalesced, "Coalesced invalidations");
        }
        true
    }

    async fn refresh(&self) {
        let provider = self.provider.clone();
        let poll_id = self.poll_id.as_str();
        let result = retry_with_backoff(&self.config.retry, "refresh results", || {
            provider.compute_results(poll_id)
        })
        .await;

        match result {
            Ok(results) => {
                self.tx.send_if_modified(|current| {
                    if current.as_deref() == Some(&results) {
                        return false;
                    }
                    *current = Some(Arc::new(results));
                    true
                });
            }
            Err(e) => {
                warn!(poll_id = %self.poll_id, error = %e, "Result refresh failed, keeping previous snapshot");
            }
        }
    }
}
