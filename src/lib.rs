#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # beststories
//!
//! Fetches the current best stories from the Hacker News API, ranks them by score and serves
//! the top `N`, with every upstream call wrapped in a resilience stack.
//!
//! ## Layout
//!
//! - **Policies**: [`timeout`], [`rate_limit`], [`bulkhead`], [`circuit_breaker`] and
//!   [`retry`], each usable on its own or as a tower layer
//! - **Pipeline**: [`stack`] folds the enabled policies around a [`transport`]
//! - **Client**: [`client::NewsApiClient`] decodes typed records and logs every call
//! - **Aggregation**: [`aggregator`] fans out story fetches with bounded parallelism
//! - **Caching**: [`cache::CacheAside`] computes each key once, however many callers miss
//! - **Query**: [`query::BestStoriesHandler`] validates and truncates
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use beststories::{BestStoriesHandler, GetBestStoriesQuery, Settings};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> beststories::Result<()> {
//!     let handler = BestStoriesHandler::from_settings(&Settings::default())?;
//!     let response = handler
//!         .handle(GetBestStoriesQuery::new(10), &CancellationToken::new())
//!         .await?;
//!     for story in response.best_stories {
//!         println!("{:>5}  {}", story.score, story.title);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Policies work without the rest of the crate:
//!
//! ```rust
//! use beststories::{Backoff, Error, InstantSleeper, Jitter, RetryPolicy};
//! use beststories::retry::transient_error;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let policy = RetryPolicy::builder()
//!     .max_retries(2)
//!     .backoff(Backoff::power(2))
//!     .with_jitter(Jitter::None)
//!     .with_sleeper(InstantSleeper)
//!     .build();
//!
//! let result = policy
//!     .execute(|| async { Err::<(), _>(Error::Network("connection reset".into())) }, transient_error)
//!     .await;
//! assert!(result.unwrap_err().is_retry_exhausted());
//! # }
//! ```

pub mod aggregator;
pub mod backoff;
pub mod bulkhead;
pub mod cache;
pub mod circuit_breaker;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod jitter;
pub mod models;
pub mod prelude;
pub mod query;
pub mod rate_limit;
pub mod retry;
pub mod sleeper;
pub mod stack;
pub mod timeout;
pub mod transport;

// Re-exports
pub use aggregator::StoryAggregator;
pub use backoff::Backoff;
pub use bulkhead::BulkheadPolicy;
pub use cache::CacheAside;
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerPolicy, CircuitState};
pub use client::{NewsApi, NewsApiClient};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::Settings;
pub use error::{Error, Result};
pub use jitter::Jitter;
pub use models::{BestStory, GetBestStoriesResponse, Story, StoryId};
pub use query::{BestStoriesHandler, GetBestStoriesQuery};
pub use rate_limit::{RateLimitPolicy, TokenBucket};
pub use retry::{RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use stack::{ResilienceStack, ResilienceStackBuilder};
pub use timeout::TimeoutPolicy;
pub use transport::{ApiRequest, ApiResponse, BoxTransport, HttpTransport};
