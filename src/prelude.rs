//! Convenient re-exports for wiring a pipeline by hand.
pub use crate::{
    backoff::{Backoff, MAX_BACKOFF},
    bulkhead::{BulkheadLayer, BulkheadPolicy},
    circuit_breaker::{BreakerOutcome, CircuitBreakerConfig, CircuitBreakerLayer, CircuitBreakerPolicy},
    client::{NewsApi, NewsApiClient},
    jitter::Jitter,
    query::{BestStoriesHandler, GetBestStoriesQuery},
    rate_limit::{RateLimitLayer, RateLimitPolicy, TokenBucket},
    retry::{transient_error, RetryLayer, RetryPolicy, RetryPolicyBuilder},
    stack::{ResilienceStack, ResilienceStackBuilder},
    timeout::{TimeoutLayer, TimeoutPolicy, MAX_TIMEOUT},
    transport::{breaker_outcome, retry_reason, ApiRequest, ApiResponse},
    Error, Result,
};
