//! Fan-out aggregation: resolve every best-story id into a full record and rank by score.

use crate::client::NewsApi;
use crate::models::{Story, StoryId};
use crate::{Error, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Fetches stories with at most `max_degree_of_parallelism` requests outstanding.
#[derive(Clone)]
pub struct StoryAggregator {
    api: Arc<dyn NewsApi>,
    max_degree_of_parallelism: usize,
}

impl std::fmt::Debug for StoryAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoryAggregator")
            .field("max_degree_of_parallelism", &self.max_degree_of_parallelism)
            .finish_non_exhaustive()
    }
}

impl StoryAggregator {
    pub fn new(api: Arc<dyn NewsApi>, max_degree_of_parallelism: usize) -> Result<Self> {
        if max_degree_of_parallelism == 0 {
            return Err(Error::config("max_degree_of_parallelism must be > 0"));
        }
        Ok(Self { api, max_degree_of_parallelism })
    }

    pub fn max_degree_of_parallelism(&self) -> usize {
        self.max_degree_of_parallelism
    }

    /// Every current best story, highest score first.
    pub async fn best_stories(&self, cancel: &CancellationToken) -> Result<Vec<Story>> {
        let ids = self.api.best_story_ids(cancel).await?;
        self.fetch_all(&ids, cancel).await
    }

    /// Fetch `ids` and sort by score, descending.
    ///
    /// The first failure wins: outstanding fetches are dropped and no partial list is returned.
    pub async fn fetch_all(&self, ids: &[StoryId], cancel: &CancellationToken) -> Result<Vec<Story>> {
        tracing::debug!(count = ids.len(), limit = self.max_degree_of_parallelism, "fetching stories");

        let fetches = stream::iter(ids.iter().copied())
            .map(|id| self.api.story(id, cancel))
            .buffer_unordered(self.max_degree_of_parallelism)
            .try_collect::<Vec<_>>();

        let mut stories = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = fetches => result?,
        };

        stories.sort_by(|a, b| b.score().cmp(&a.score()));
        Ok(stories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeApi {
        scores: HashMap<u64, i64>,
        failing: Option<u64>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl NewsApi for FakeApi {
        async fn best_story_ids(&self, _cancel: &CancellationToken) -> Result<Vec<StoryId>> {
            let mut ids: Vec<_> = self.scores.keys().copied().map(StoryId).collect();
            ids.sort();
            Ok(ids)
        }

        async fn story(&self, id: StoryId, _cancel: &CancellationToken) -> Result<Story> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing == Some(id.0) {
                return Err(Error::NonSuccessStatus { code: 500 });
            }

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Story::new(id, format!("story {id}"), self.scores[&id.0]))
        }
    }

    fn api(scores: &[(u64, i64)]) -> FakeApi {
        FakeApi { scores: scores.iter().copied().collect(), ..FakeApi::default() }
    }

    #[test]
    fn rejects_zero_parallelism() {
        assert!(StoryAggregator::new(Arc::new(api(&[])), 0).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn sorts_by_score_descending() {
        let aggregator =
            StoryAggregator::new(Arc::new(api(&[(123456, 50), (654321, 200)])), 20).expect("valid");

        let stories = aggregator.best_stories(&CancellationToken::new()).await.unwrap();
        let ids: Vec<_> = stories.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![StoryId(654321), StoryId(123456)]);
    }

    #[tokio::test(start_paused = true)]
    async fn respects_parallelism_bound() {
        let scores: Vec<_> = (1..=50).map(|id| (id, id as i64)).collect();
        let fake = Arc::new(api(&scores));
        let aggregator = StoryAggregator::new(fake.clone(), 4).expect("valid");

        let stories = aggregator.best_stories(&CancellationToken::new()).await.unwrap();
        assert_eq!(stories.len(), 50);
        assert!(fake.max_in_flight.load(Ordering::SeqCst) <= 4);
        assert!(stories.windows(2).all(|w| w[0].score() >= w[1].score()));
    }

    #[tokio::test(start_paused = true)]
    async fn single_failure_fails_the_whole_batch() {
        let mut fake = api(&[(1, 10), (2, 20), (3, 30)]);
        fake.failing = Some(2);
        let aggregator = StoryAggregator::new(Arc::new(fake), 2).expect("valid");

        let err = aggregator.best_stories(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(err, Error::NonSuccessStatus { code: 500 });
    }

    #[tokio::test(start_paused = true)]
    async fn early_failure_stops_issuing_fetches() {
        let scores: Vec<_> = (1..=100).map(|id| (id, id as i64)).collect();
        let mut fake = api(&scores);
        fake.failing = Some(1);
        let fake = Arc::new(fake);
        let aggregator = StoryAggregator::new(fake.clone(), 4).expect("valid");

        let err = aggregator.best_stories(&CancellationToken::new()).await.unwrap_err();

        assert_eq!(err, Error::NonSuccessStatus { code: 500 });
        let calls = fake.calls.load(Ordering::SeqCst);
        assert!(calls <= 4, "fetched {calls} stories after the first failure");
    }

    #[tokio::test(start_paused = true)]
    async fn empty_id_list_yields_empty_result() {
        let aggregator = StoryAggregator::new(Arc::new(api(&[])), 3).expect("valid");
        assert!(aggregator.best_stories(&CancellationToken::new()).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_fan_out() {
        let aggregator = StoryAggregator::new(Arc::new(api(&[(1, 1), (2, 2)])), 1).expect("valid");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = aggregator.fetch_all(&[StoryId(1), StoryId(2)], &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
