//! The best-stories query: validate, fetch (through the cache when enabled), truncate.

use crate::aggregator::StoryAggregator;
use crate::cache::CacheAside;
use crate::client::{NewsApi, NewsApiClient};
use crate::clock::Clock;
use crate::config::{BestStoriesSettings, Settings};
use crate::models::{BestStory, GetBestStoriesResponse, Story};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Request for the top `number_of_stories` best stories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBestStoriesQuery {
    pub number_of_stories: i64,
}

impl GetBestStoriesQuery {
    pub fn new(number_of_stories: i64) -> Self {
        Self { number_of_stories }
    }

    /// The requested count, if it is at least one.
    pub fn validate(&self) -> Result<usize> {
        if self.number_of_stories <= 0 {
            return Err(Error::Validation("Number of stories needs to be greater than 0".into()));
        }
        Ok(usize::try_from(self.number_of_stories).unwrap_or(usize::MAX))
    }
}

#[derive(Debug)]
struct StoryCache {
    cache: CacheAside<Vec<Story>>,
    key: String,
    ttl: Duration,
}

/// Serves best-story queries over a [`NewsApi`].
///
/// With caching enabled the full ranked list is stored under one key and every query is
/// answered from it, so requests for different counts share a single upstream fan-out.
#[derive(Debug)]
pub struct BestStoriesHandler {
    aggregator: StoryAggregator,
    cache: Option<StoryCache>,
}

impl BestStoriesHandler {
    pub fn new(api: Arc<dyn NewsApi>, settings: &BestStoriesSettings) -> Result<Self> {
        Self::build(api, settings, CacheAside::new())
    }

    /// Like [`new`](Self::new), with cache expiry measured on `clock`.
    pub fn with_clock<C: Clock + 'static>(
        api: Arc<dyn NewsApi>,
        settings: &BestStoriesSettings,
        clock: C,
    ) -> Result<Self> {
        Self::build(api, settings, CacheAside::with_clock(clock))
    }

    /// HTTP client and handler wired from one settings document.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        settings.validate()?;
        let client = NewsApiClient::from_settings(&settings.news_api)?;
        Self::new(Arc::new(client), &settings.best_stories)
    }

    fn build(
        api: Arc<dyn NewsApi>,
        settings: &BestStoriesSettings,
        cache: CacheAside<Vec<Story>>,
    ) -> Result<Self> {
        settings.validate()?;
        let aggregator = StoryAggregator::new(api, settings.max_degree_of_parallelism)?;
        let cache = settings.cache_enabled.then(|| StoryCache {
            cache,
            key: settings.cache_key.clone(),
            ttl: settings.cache_ttl(),
        });
        Ok(Self { aggregator, cache })
    }

    /// Drop the cached list so the next query refetches.
    pub fn invalidate(&self) {
        if let Some(c) = &self.cache {
            c.cache.invalidate(&c.key);
        }
    }

    /// Validate `query` and answer it.
    pub async fn handle(
        &self,
        query: GetBestStoriesQuery,
        cancel: &CancellationToken,
    ) -> Result<GetBestStoriesResponse> {
        let count = query.validate().inspect_err(|err| {
            tracing::warn!(number_of_stories = query.number_of_stories, error = %err, "rejected query");
        })?;
        let stories = self.best_stories(count, cancel).await?;
        Ok(stories.iter().map(BestStory::from).collect())
    }

    /// The `count` highest-scored stories, or all of them if fewer exist.
    pub async fn best_stories(&self, count: usize, cancel: &CancellationToken) -> Result<Vec<Story>> {
        let Some(c) = &self.cache else {
            let mut stories = self.aggregator.best_stories(cancel).await?;
            stories.truncate(count);
            return Ok(stories);
        };

        // The shared computation outlives any single caller, so it runs on its own token.
        // Cancelling this caller drops its interest; another waiter can take the work over.
        let aggregator = self.aggregator.clone();
        let cached = c.cache.get_or_compute(&c.key, c.ttl, || async move {
            aggregator.best_stories(&CancellationToken::new()).await
        });
        let stories = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = cached => result?,
        };

        Ok(stories.iter().take(count).cloned().collect())
    }
}
