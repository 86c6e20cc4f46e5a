//! Result visibility gate.
//!
//! Results of a poll are hidden from an identity until that identity has
//! voted. The decision itself is a small state machine ([`GateController`])
//! fed with evidence gathered by [`GateService`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use unirank_common::config::CategoryGatePolicy;
use unirank_common::{AppError, AppResult, RetryConfig, retry_with_backoff};

use super::identity::Identity;
use super::progress::{LocalProgress, ProgressEntry, ProgressStore};
use super::store::PollStore;

/// Visibility of a result view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateState {
    /// Lookups are still in flight.
    Loading,
    /// The identity has not voted yet.
    Locked,
    /// The identity has voted and there is something to show.
    Unlocked,
    /// There is nothing to show, whoever asks.
    Empty,
}

impl GateState {
    /// Whether the state is final for its view.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Loading)
    }
}

/// Facts a poll gate is decided on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollEvidence {
    /// Whether the poll has any options.
    pub has_options: bool,
    /// Votes cast on the poll by anyone.
    pub total_votes: u64,
    /// Whether the asking identity voted.
    pub has_voted: bool,
}

impl PollEvidence {
    /// Decide the gate state.
    ///
    /// No options is always `Empty`. A voter sees `Unlocked` once the poll has
    /// votes and `Empty` if the ledger somehow holds none. Everyone else is
    /// `Locked`.
    #[must_use]
    pub const fn decide(&self) -> GateState {
        if !self.has_options {
            return GateState::Empty;
        }
        match (self.has_voted, self.total_votes) {
            (true, 0) => GateState::Empty,
            (true, _) => GateState::Unlocked,
            (false, _) => GateState::Locked,
        }
    }
}

/// Facts a category gate is decided on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryEvidence {
    /// Polls in the category.
    pub poll_count: usize,
    /// Polls in the category the identity voted in.
    pub voted_count: usize,
}

impl CategoryEvidence {
    /// Decide the gate state under `policy`.
    #[must_use]
    pub const fn decide(&self, policy: CategoryGatePolicy) -> GateState {
        if self.poll_count == 0 {
            return GateState::Empty;
        }
        let unlocked = match policy {
            CategoryGatePolicy::Any => self.voted_count > 0,
            CategoryGatePolicy::All => self.voted_count >= self.poll_count,
        };
        if unlocked {
            GateState::Unlocked
        } else {
            GateState::Locked
        }
    }

    /// Share of the category's polls the identity voted in, 0 to 100.
    #[must_use]
    pub fn completion_percent(&self) -> f64 {
        if self.poll_count == 0 {
            0.0
        } else {
            self.voted_count as f64 / self.poll_count as f64 * 100.0
        }
    }
}

/// Gate state machine for one view.
///
/// Starts in [`GateState::Loading`] and moves exactly once to a terminal
/// state; later inputs are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateController {
    state: GateState,
}

impl Default for GateController {
    fn default() -> Self {
        Self::new()
    }
}

impl GateController {
    /// A controller in `Loading`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: GateState::Loading,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> GateState {
        self.state
    }

    fn transition(&mut self, next: GateState) -> GateState {
        if !self.state.is_terminal() {
            self.state = next;
        }
        self.state
    }

    /// Resolve with poll evidence.
    pub fn resolve_poll(&mut self, evidence: &PollEvidence) -> GateState {
        self.transition(evidence.decide())
    }

    /// Resolve with category evidence.
    pub fn resolve_category(
        &mut self,
        evidence: &CategoryEvidence,
        policy: CategoryGatePolicy,
    ) -> GateState {
        self.transition(evidence.decide(policy))
    }

    /// Resolve to `Empty` because the target does not exist.
    pub fn resolve_missing(&mut self) -> GateState {
        self.transition(GateState::Empty)
    }

    /// A lookup failed; fail closed.
    pub fn fail(&mut self) -> GateState {
        self.transition(GateState::Locked)
    }
}

/// What a gate is asked about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateTarget {
    /// A single poll.
    Poll(String),
    /// Every poll of a category.
    Category(String),
}

/// Resolved gate of one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollGate {
    /// Poll ID.
    pub poll_id: String,
    /// Gate state.
    pub state: GateState,
    /// Whether the identity voted.
    pub has_voted: bool,
}

/// Resolved gate of a category.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryGate {
    /// Category name.
    pub category: String,
    /// Gate state.
    pub state: GateState,
    /// Policy the state was decided under.
    pub policy: CategoryGatePolicy,
    /// Polls in the category.
    pub poll_count: usize,
    /// Polls the identity voted in.
    pub voted_count: usize,
    /// `voted_count / poll_count` as a percentage.
    pub completion_percent: f64,
    /// Polls of the category the identity voted in.
    pub voted_poll_ids: Vec<String>,
}

/// Gathers gate evidence from the progress mirror and the ledger.
#[derive(Clone)]
pub struct GateService {
    store: Arc<dyn PollStore>,
    progress: Arc<dyn ProgressStore>,
    policy: CategoryGatePolicy,
    retry: RetryConfig,
}

impl GateService {
    /// Create a new gate service.
    #[must_use]
    pub fn new(
        store: Arc<dyn PollStore>,
        progress: Arc<dyn ProgressStore>,
        policy: CategoryGatePolicy,
    ) -> Self {
        Self {
            store,
            progress,
            policy,
            retry: RetryConfig {
                max_retries: 2,
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
                multiplier: 2.0,
            },
        }
    }

    /// Replace the lookup retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Category rule in effect.
    #[must_use]
    pub const fn policy(&self) -> CategoryGatePolicy {
        self.policy
    }

    /// Whether the identity voted on the poll.
    ///
    /// A mirror hit answers immediately. A miss asks the ledger, and a ledger
    /// hit is written back to the mirror.
    pub async fn has_voted(&self, poll_id: &str, identity: &Identity) -> AppResult<bool> {
        match self.progress.load(identity).await {
            Ok(progress) if progress.has_voted(poll_id) => return Ok(true),
            Ok(_) => {}
            Err(e) => warn!(poll_id = %poll_id, error = %e, "Progress mirror unreadable"),
        }
        self.ledger_has_voted(poll_id, identity).await
    }

    async fn ledger_has_voted(&self, poll_id: &str, identity: &Identity) -> AppResult<bool> {
        let Some(vote) = self.store.find_vote(poll_id, identity.as_str()).await? else {
            return Ok(false);
        };

        debug!(poll_id = %poll_id, "Repairing progress mirror from ledger");
        let entry = ProgressEntry {
            option_id: vote.option_id,
            voted_at: vote.created_at.with_timezone(&chrono::Utc),
        };
        if let Err(e) = self.progress.record(identity, poll_id, entry).await {
            warn!(poll_id = %poll_id, error = %e, "Failed to repair progress mirror");
        }
        Ok(true)
    }

    /// Gate of a single poll.
    pub async fn poll_gate(&self, poll_id: &str, identity: &Identity) -> AppResult<PollGate> {
        let snapshot = self
            .store
            .find_poll(poll_id)
            .await?
            .ok_or_else(|| AppError::PollNotFound(poll_id.to_string()))?;

        let has_voted = self.has_voted(poll_id, identity).await?;
        let total_votes = if has_voted && snapshot.has_options() {
            self.store
                .tally(poll_id)
                .await?
                .iter()
                .filter_map(|row| row.vote_count)
                .filter(|count| *count > 0)
                .map(|count| count as u64)
                .sum()
        } else {
            0
        };

        let evidence = PollEvidence {
            has_options: snapshot.has_options(),
            total_votes,
            has_voted,
        };
        let mut controller = GateController::new();
        Ok(PollGate {
            poll_id: poll_id.to_string(),
            state: controller.resolve_poll(&evidence),
            has_voted,
        })
    }

    /// Gate of a category.
    pub async fn category_gate(
        &self,
        category: &str,
        identity: &Identity,
    ) -> AppResult<CategoryGate> {
        let poll_ids = self.store.poll_ids_in_category(category).await?;
        let progress = match self.progress.load(identity).await {
            Ok(progress) => progress,
            Err(e) => {
                warn!(category = %category, error = %e, "Progress mirror unreadable");
                LocalProgress::new(identity.clone())
            }
        };

        let mut voted_poll_ids = Vec::new();
        for poll_id in &poll_ids {
            if progress.has_voted(poll_id) || self.ledger_has_voted(poll_id, identity).await? {
                voted_poll_ids.push(poll_id.clone());
            }
        }

        let evidence = CategoryEvidence {
            poll_count: poll_ids.len(),
            voted_count: voted_poll_ids.len(),
        };
        let mut controller = GateController::new();
        Ok(CategoryGate {
            category: category.to_string(),
            state: controller.resolve_category(&evidence, self.policy),
            policy: self.policy,
            poll_count: evidence.poll_count,
            voted_count: evidence.voted_count,
            completion_percent: evidence.completion_percent(),
            voted_poll_ids,
        })
    }

    /// Gate state of a poll or category. Never returns `Loading`.
    ///
    /// Transient lookup failures are retried; a lookup that still fails
    /// leaves the view `Locked`. A poll that does not exist is `Empty`.
    pub async fn get_gate_state(&self, target: &GateTarget, identity: &Identity) -> GateState {
        let mut controller = GateController::new();

        let result = match target {
            GateTarget::Poll(poll_id) => {
                retry_with_backoff(&self.retry, "poll gate", || {
                    self.poll_gate(poll_id, identity)
                })
                .await
                .map(|gate| gate.state)
            }
            GateTarget::Category(category) => {
                retry_with_backoff(&self.retry, "category gate", || {
                    self.category_gate(category, identity)
                })
                .await
                .map(|gate| gate.state)
            }
        };

        match result {
            Ok(state) => controller.transition(state),
            Err(AppError::PollNotFound(_)) => controller.resolve_missing(),
            Err(e) => {
                warn!(?target, error = %e, "Gate lookup failed, locking view");
                controller.fail()
            }
        }
    }

    /// The identity's progress mirror.
    pub async fn progress(&self, identity: &Identity) -> AppResult<LocalProgress> {
        self.progress.load(identity).await
    }

    /// Rebuild the identity's progress mirror from the ledger.
    pub async fn reconcile(&self, identity: &Identity) -> AppResult<LocalProgress> {
        let votes = self.store.votes_by_identity(identity.as_str()).await?;
        let progress = LocalProgress::from_votes(identity.clone(), &votes);
        self.progress.replace(progress.clone()).await?;

        debug!(polls = progress.votes.len(), "Reconciled progress mirror");
        Ok(progress)
    }
}
