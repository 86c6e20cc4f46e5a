//! Result aggregation.
//!
//! Turns raw per-option tallies into ranked, percentage-normalized results.
//! The computation is pure and deterministic: identical input always yields
//! identical output, down to serialized bytes.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;
use unirank_common::{AppError, AppResult};
use unirank_db::{entities::poll_option, repositories::TallyRow};

use super::store::PollStore;

/// Aggregated standing of one option.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionResult {
    /// Option ID.
    pub option_id: String,
    /// Display name.
    pub name: String,
    /// Abbreviated display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    /// Display color.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Votes for this option.
    pub vote_count: u64,
    /// Share of all votes, 0 to 100. Zero for every option when nobody voted.
    pub percentage: f64,
    /// 1-based rank; ties broken by option ID ascending.
    pub rank: u32,
    /// Whole-point percentage gap to the next rank; absent for the last rank.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leading_margin: Option<i64>,
}

/// Ranked results of a poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResults {
    /// Poll the results belong to.
    pub poll_id: String,
    /// Options in rank order.
    pub results: Vec<OptionResult>,
    /// Sum of all vote counts.
    pub total_votes: u64,
}

/// Compute ranked results from the poll's options and its tally rows.
///
/// Every option appears in the output, with zero votes if it has no row.
/// Rows without an option ID or count, with a negative count, for an option
/// outside the poll, or repeating an option already seen are dropped and
/// logged.
#[must_use]
pub fn compute_results(
    poll_id: &str,
    options: &[poll_option::Model],
    rows: &[TallyRow],
) -> PollResults {
    let mut counts: BTreeMap<&str, Option<u64>> =
        options.iter().map(|o| (o.id.as_str(), None)).collect();

    for row in rows {
        let (Some(option_id), Some(vote_count)) = (row.option_id.as_deref(), row.vote_count) else {
            warn!(poll_id = %poll_id, ?row, "Dropping tally row with missing fields");
            continue;
        };
        let Ok(vote_count) = u64::try_from(vote_count) else {
            warn!(poll_id = %poll_id, option_id, vote_count, "Dropping tally row with negative count");
            continue;
        };
        match counts.get_mut(option_id) {
            None => {
                warn!(poll_id = %poll_id, option_id, "Dropping tally row for unknown option");
            }
            Some(slot) if slot.is_some() => {
                warn!(poll_id = %poll_id, option_id, "Dropping duplicate tally row");
            }
            Some(slot) => *slot = Some(vote_count),
        }
    }

    let total_votes: u64 = counts.values().map(|c| c.unwrap_or(0)).sum();

    let mut results: Vec<OptionResult> = options
        .iter()
        .filter_map(|option| {
            let vote_count = counts.get(option.id.as_str()).copied().flatten().unwrap_or(0);
            let percentage = if total_votes > 0 {
                vote_count as f64 / total_votes as f64 * 100.0
            } else {
                0.0
            };
            if !percentage.is_finite() || percentage < 0.0 {
                warn!(poll_id = %poll_id, option_id = %option.id, percentage, "Dropping invalid result");
                return None;
            }
            Some(OptionResult {
                option_id: option.id.clone(),
                name: option.name.clone(),
                short_name: option.short_name.clone(),
                color: option.color.clone(),
                vote_count,
                percentage,
                rank: 0,
                leading_margin: None,
            })
        })
        .collect();

    results.sort_by(|a, b| {
        b.vote_count
            .cmp(&a.vote_count)
            .then_with(|| a.option_id.cmp(&b.option_id))
    });
    results.dedup_by(|a, b| a.option_id == b.option_id);

    let next_percentages: Vec<Option<f64>> = results
        .iter()
        .skip(1)
        .map(|r| Some(r.percentage))
        .chain(std::iter::once(None))
        .collect();
    for (i, (result, next)) in results.iter_mut().zip(next_percentages).enumerate() {
        result.rank = (i + 1) as u32;
        result.leading_margin = next.map(|next| (result.percentage - next).round() as i64);
    }

    PollResults {
        poll_id: poll_id.to_string(),
        results,
        total_votes,
    }
}

/// Anything that can produce fresh results for a poll.
#[async_trait]
pub trait ResultsProvider: Send + Sync {
    /// Compute the current results of a poll.
    async fn compute_results(&self, poll_id: &str) -> AppResult<PollResults>;
}

/// Aggregator backed by the poll store.
#[derive(Clone)]
pub struct AggregatorService {
    store: Arc<dyn PollStore>,
}

impl AggregatorService {
    /// Create a new aggregator service.
    #[must_use]
    pub fn new(store: Arc<dyn PollStore>) -> Self {
        Self { store }
    }

    /// Current results of a poll.
    pub async fn get_results(&self, poll_id: &str) -> AppResult<PollResults> {
        let snapshot = self
            .store
            .find_poll(poll_id)
            .await?
            .ok_or_else(|| AppError::PollNotFound(poll_id.to_string()))?;
        let rows = self.store.tally(poll_id).await?;

        Ok(compute_results(poll_id, &snapshot.options, &rows))
    }
}

#[async_trait]
impl ResultsProvider for AggregatorService {
    async fn compute_results(&self, poll_id: &str) -> AppResult<PollResults> {
        self.get_results(poll_id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::memory_store::MemoryPollStore;
    use crate::services::test_support::{options, poll_model};

    fn percentages(results: &PollResults) -> Vec<f64> {
        results.results.iter().map(|r| r.percentage).collect()
    }

    #[test]
    fn test_tie_broken_by_option_id() {
        let opts = options("p", &["c", "b", "a"]);
        let rows = vec![
            TallyRow::new("c", 5),
            TallyRow::new("b", 10),
            TallyRow::new("a", 10),
        ];

        let results = compute_results("p", &opts, &rows);

        let order: Vec<_> = results.results.iter().map(|r| r.option_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(percentages(&results), vec![40.0, 40.0, 20.0]);
        assert_eq!(results.results[0].rank, 1);
        assert_eq!(results.results[1].rank, 2);
        assert_eq!(results.results[0].leading_margin, Some(0));
        assert_eq!(results.results[1].leading_margin, Some(20));
        assert_eq!(results.results[2].leading_margin, None);
        assert_eq!(results.total_votes, 25);
    }

    #[test]
    fn test_no_votes_means_zero_percentages() {
        let results = compute_results("p", &options("p", &["a", "b"]), &[]);

        assert_eq!(results.total_votes, 0);
        assert_eq!(results.results.len(), 2);
        assert!(results.results.iter().all(|r| r.percentage == 0.0 && r.vote_count == 0));
    }

    #[test]
    fn test_percentages_sum_to_hundred() {
        let ids: Vec<String> = (0..7).map(|i| format!("o{i}")).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let opts = options("p", &id_refs);

        for seed in 1..40i64 {
            let rows: Vec<_> = ids
                .iter()
                .enumerate()
                .map(|(i, id)| TallyRow::new(id.as_str(), (seed * (i as i64 + 3)) % 11))
                .collect();
            let results = compute_results("p", &opts, &rows);
            let sum: f64 = percentages(&results).iter().sum();

            if results.total_votes == 0 {
                assert_eq!(sum, 0.0);
            } else {
                assert!((99.9..=100.1).contains(&sum), "seed {seed}: sum {sum}");
            }
            assert!(
                results
                    .results
                    .windows(2)
                    .all(|w| w[0].vote_count >= w[1].vote_count)
            );
        }
    }

    #[test]
    fn test_malformed_rows_are_dropped() {
        let opts = options("p", &["a", "b"]);
        let rows = vec![
            TallyRow::new("a", 3),
            TallyRow {
                option_id: None,
                vote_count: Some(100),
            },
            TallyRow {
                option_id: Some("b".to_string()),
                vote_count: None,
            },
            TallyRow::new("b", -4),
            TallyRow::new("ghost", 50),
            TallyRow::new("a", 9),
            TallyRow::new("b", 1),
        ];

        let results = compute_results("p", &opts, &rows);

        assert_eq!(results.total_votes, 4);
        assert_eq!(results.results[0].option_id, "a");
        assert_eq!(results.results[0].vote_count, 3);
        assert_eq!(results.results[1].vote_count, 1);
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let opts = options("p", &["a", "b", "c"]);
        let rows = vec![TallyRow::new("b", 2), TallyRow::new("a", 1)];
        let reordered = vec![TallyRow::new("a", 1), TallyRow::new("b", 2)];

        let first = serde_json::to_string(&compute_results("p", &opts, &rows)).unwrap();
        let second = serde_json::to_string(&compute_results("p", &opts, &reordered)).unwrap();

        assert_eq!(first, second);
        assert!(first.contains("\"totalVotes\":3"));
        assert!(first.contains("\"leadingMargin\""));
    }

    #[tokio::test]
    async fn test_get_results_unknown_poll() {
        let aggregator = AggregatorService::new(Arc::new(MemoryPollStore::new()));
        let err = aggregator.get_results("nope").await.unwrap_err();
        assert!(matches!(err, AppError::PollNotFound(_)));
    }

    #[tokio::test]
    async fn test_get_results_is_idempotent() {
        let store = Arc::new(MemoryPollStore::new());
        store
            .create_poll(poll_model("p", "campus"), options("p", &["a", "b"]))
            .await
            .unwrap();
        store
            .insert_vote(unirank_db::entities::vote::Model {
                id: "v1".to_string(),
                poll_id: "p".to_string(),
                option_id: "a".to_string(),
                identity: "x".to_string(),
                created_at: crate::services::test_support::now().into(),
            })
            .await
            .unwrap();

        let aggregator = AggregatorService::new(store);
        let first = serde_json::to_vec(&aggregator.get_results("p").await.unwrap()).unwrap();
        let second = serde_json::to_vec(&aggregator.get_results("p").await.unwrap()).unwrap();

        assert_eq!(first, second);
    }
}
