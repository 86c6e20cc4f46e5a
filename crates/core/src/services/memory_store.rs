//! In-process [`PollStore`] driver.
//!
//! Every mutation runs inside one critical section, which gives `insert_vote`
//! the same all-or-nothing uniqueness guarantee as the database unique index.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use unirank_common::{AppError, AppResult};
use unirank_db::{
    entities::{poll, poll_option, vote},
    repositories::{PollFilter, TallyRow},
};

use super::store::{PollSnapshot, PollStore};

#[derive(Default)]
struct MemoryState {
    polls: BTreeMap<String, poll::Model>,
    options: BTreeMap<String, Vec<poll_option::Model>>,
    votes: Vec<vote::Model>,
    voted: HashSet<(String, String)>,
}

/// [`PollStore`] kept in memory.
#[derive(Default)]
pub struct MemoryPollStore {
    state: Mutex<MemoryState>,
}

impl MemoryPollStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("poll store lock poisoned".to_string()))
    }

    /// Number of vote rows stored for a poll.
    pub fn vote_count(&self, poll_id: &str) -> AppResult<usize> {
        Ok(self
            .lock()?
            .votes
            .iter()
            .filter(|v| v.poll_id == poll_id)
            .count())
    }
}

#[async_trait]
impl PollStore for MemoryPollStore {
    async fn create_poll(
        &self,
        poll: poll::Model,
        options: Vec<poll_option::Model>,
    ) -> AppResult<PollSnapshot> {
        let mut state = self.lock()?;
        if state.polls.contains_key(&poll.id) {
            return Err(AppError::Conflict(format!("poll {} already exists", poll.id)));
        }

        let mut options = options;
        options.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));

        state.polls.insert(poll.id.clone(), poll.clone());
        state.options.insert(poll.id.clone(), options.clone());
        Ok(PollSnapshot { poll, options })
    }

    async fn find_poll(&self, poll_id: &str) -> AppResult<Option<PollSnapshot>> {
        let state = self.lock()?;
        Ok(state.polls.get(poll_id).map(|poll| PollSnapshot {
            poll: poll.clone(),
            options: state.options.get(poll_id).cloned().unwrap_or_default(),
        }))
    }

    async fn list_polls(&self, filter: &PollFilter, limit: u64) -> AppResult<Vec<poll::Model>> {
        let state = self.lock()?;
        let mut polls: Vec<&poll::Model> = state
            .polls
            .values()
            .filter(|p| filter.category.as_ref().is_none_or(|c| *c == p.category))
            .filter(|p| filter.cycle.as_ref().is_none_or(|c| *c == p.cycle))
            .filter(|p| !filter.active_only || p.is_active)
            .collect();
        polls.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(polls
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn poll_ids_in_category(&self, category: &str) -> AppResult<Vec<String>> {
        let state = self.lock()?;
        Ok(state
            .polls
            .values()
            .filter(|p| p.category == category)
            .map(|p| p.id.clone())
            .collect())
    }

    async fn set_poll_active(&self, poll_id: &str, is_active: bool) -> AppResult<poll::Model> {
        let mut state = self.lock()?;
        let poll = state
            .polls
            .get_mut(poll_id)
            .ok_or_else(|| AppError::PollNotFound(poll_id.to_string()))?;
        poll.is_active = is_active;
        Ok(poll.clone())
    }

    async fn insert_vote(&self, vote: vote::Model) -> AppResult<bool> {
        let mut state = self.lock()?;

        let option_exists = state
            .options
            .get(&vote.poll_id)
            .is_some_and(|options| options.iter().any(|o| o.id == vote.option_id));
        if !option_exists {
            return Err(AppError::Database(format!(
                "vote references unknown option {} of poll {}",
                vote.option_id, vote.poll_id
            )));
        }

        let key = (vote.poll_id.clone(), vote.identity.clone());
        if !state.voted.insert(key) {
            return Ok(false);
        }
        state.votes.push(vote);
        Ok(true)
    }

    async fn has_vote(&self, poll_id: &str, identity: &str) -> AppResult<bool> {
        let state = self.lock()?;
        Ok(state
            .voted
            .contains(&(poll_id.to_string(), identity.to_string())))
    }

    async fn find_vote(&self, poll_id: &str, identity: &str) -> AppResult<Option<vote::Model>> {
        let state = self.lock()?;
        Ok(state
            .votes
            .iter()
            .find(|v| v.poll_id == poll_id && v.identity == identity)
            .cloned())
    }

    async fn tally(&self, poll_id: &str) -> AppResult<Vec<TallyRow>> {
        let state = self.lock()?;
        let mut counts: BTreeMap<&str, i64> = BTreeMap::new();
        for vote in state.votes.iter().filter(|v| v.poll_id == poll_id) {
            *counts.entry(vote.option_id.as_str()).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(option_id, count)| TallyRow::new(option_id, count))
            .collect())
    }

    async fn votes_by_identity(&self, identity: &str) -> AppResult<Vec<vote::Model>> {
        let state = self.lock()?;
        Ok(state
            .votes
            .iter()
            .filter(|v| v.identity == identity)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;

    fn poll(id: &str, category: &str) -> poll::Model {
        poll::Model {
            id: id.to_string(),
            question: "Best dorms?".to_string(),
            category: category.to_string(),
            cycle: "2026-10".to_string(),
            is_active: true,
            ends_at: None,
            created_at: Utc::now().into(),
        }
    }

    fn option(id: &str, poll_id: &str, position: i32) -> poll_option::Model {
        poll_option::Model {
            id: id.to_string(),
            poll_id: poll_id.to_string(),
            name: id.to_uppercase(),
            short_name: None,
            color: None,
            position,
        }
    }

    fn vote(id: &str, poll_id: &str, option_id: &str, identity: &str) -> vote::Model {
        vote::Model {
            id: id.to_string(),
            poll_id: poll_id.to_string(),
            option_id: option_id.to_string(),
            identity: identity.to_string(),
            created_at: Utc::now().into(),
        }
    }

    async fn seeded() -> MemoryPollStore {
        let store = MemoryPollStore::new();
        store
            .create_poll(poll("p1", "campus"), vec![option("b", "p1", 1), option("a", "p1", 0)])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_options_are_kept_in_display_order() {
        let store = seeded().await;
        let snapshot = store.find_poll("p1").await.unwrap().unwrap();
        let ids: Vec<_> = snapshot.options.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_second_vote_from_identity_is_rejected() {
        let store = seeded().await;

        assert!(store.insert_vote(vote("v1", "p1", "a", "x")).await.unwrap());
        assert!(!store.insert_vote(vote("v2", "p1", "b", "x")).await.unwrap());

        assert_eq!(store.vote_count("p1").unwrap(), 1);
        assert_eq!(store.tally("p1").await.unwrap(), vec![TallyRow::new("a", 1)]);
    }

    #[tokio::test]
    async fn test_vote_for_unknown_option_fails() {
        let store = seeded().await;
        let result = store.insert_vote(vote("v1", "p1", "zzz", "x")).await;
        assert!(matches!(result, Err(AppError::Database(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicates_insert_once() {
        let store = Arc::new(seeded().await);

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .insert_vote(vote(&format!("v{i}"), "p1", "a", "same"))
                        .await
                        .unwrap()
                })
            })
            .collect();
        let inserted = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();

        assert_eq!(inserted, 1);
        assert_eq!(store.vote_count("p1").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_and_category_lookup() {
        let store = seeded().await;
        store.create_poll(poll("p2", "food"), vec![]).await.unwrap();
        store.set_poll_active("p2", false).await.unwrap();

        let active = store
            .list_polls(
                &PollFilter {
                    active_only: true,
                    ..Default::default()
                },
                10,
            )
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(store.poll_ids_in_category("food").await.unwrap(), vec!["p2"]);
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let store = MemoryPollStore::new();
        let base = Utc::now();
        for (id, age_minutes) in [("a-newest", 0), ("z-oldest", 20), ("m-middle", 10), ("b-tie", 10)] {
            let mut model = poll(id, "campus");
            model.created_at = (base - chrono::Duration::minutes(age_minutes)).into();
            store.create_poll(model, vec![]).await.unwrap();
        }

        let listed = store.list_polls(&PollFilter::default(), 10).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a-newest", "m-middle", "b-tie", "z-oldest"]);

        let newest = store.list_polls(&PollFilter::default(), 1).await.unwrap();
        assert_eq!(newest[0].id, "a-newest");
    }
}
