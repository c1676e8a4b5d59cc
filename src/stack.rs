//! Resilience stack: an ordered list of policy layers folded around a transport.
//!
//! Layers are listed innermost first and the fold always applies them in this order:
//!
//! ```text
//! Retry → CircuitBreaker → Bulkhead → RateLimit → Timeout → transport
//! ```
//!
//! Every retry attempt therefore passes the breaker, is admitted by the bulkhead, spends a
//! rate-limit token and gets its own timeout. Disabled policies are simply absent from the list.

use crate::bulkhead::{BulkheadLayer, BulkheadPolicy};
use crate::circuit_breaker::{CircuitBreakerLayer, CircuitBreakerPolicy, CircuitState};
use crate::clock::{Clock, MonotonicClock};
use crate::config::NewsApiSettings;
use crate::rate_limit::{RateLimitLayer, RateLimitPolicy, TokenBucket};
use crate::retry::{RetryLayer, RetryPolicy};
use crate::timeout::{TimeoutLayer, TimeoutPolicy};
use crate::transport::{breaker_outcome, retry_reason, ApiRequest, ApiResponse, BoxTransport};
use crate::{Backoff, Error, Jitter, Result, Sleeper, TokioSleeper};
use std::sync::Arc;
use std::time::Duration;
use tower::util::BoxCloneSyncService;
use tower_layer::Layer;
use tower_service::Service;

/// One policy in the stack.
#[derive(Debug, Clone)]
pub enum PolicyLayer {
    Timeout(TimeoutPolicy),
    RateLimit(RateLimitPolicy),
    Bulkhead(BulkheadPolicy),
    CircuitBreaker(CircuitBreakerPolicy),
    Retry(RetryPolicy),
}

impl PolicyLayer {
    pub fn name(&self) -> &'static str {
        match self {
            PolicyLayer::Timeout(_) => "timeout",
            PolicyLayer::RateLimit(_) => "rate_limit",
            PolicyLayer::Bulkhead(_) => "bulkhead",
            PolicyLayer::CircuitBreaker(_) => "circuit_breaker",
            PolicyLayer::Retry(_) => "retry",
        }
    }

    /// Wrap `inner` in this policy.
    pub fn wrap(&self, inner: BoxTransport) -> BoxTransport {
        match self {
            PolicyLayer::Timeout(p) => BoxCloneSyncService::new(TimeoutLayer::new(*p).layer(inner)),
            PolicyLayer::RateLimit(p) => {
                BoxCloneSyncService::new(RateLimitLayer::new(p.clone()).layer(inner))
            }
            PolicyLayer::Bulkhead(p) => {
                BoxCloneSyncService::new(BulkheadLayer::new(p.clone()).layer(inner))
            }
            PolicyLayer::CircuitBreaker(p) => BoxCloneSyncService::new(
                CircuitBreakerLayer::new(p.clone(), breaker_outcome).layer(inner),
            ),
            PolicyLayer::Retry(p) => {
                BoxCloneSyncService::new(RetryLayer::new(p.clone(), retry_reason).layer(inner))
            }
        }
    }
}

/// The configured policies, innermost first. Clones share policy state.
#[derive(Debug, Clone, Default)]
pub struct ResilienceStack {
    layers: Vec<PolicyLayer>,
}

impl ResilienceStack {
    pub fn builder() -> ResilienceStackBuilder {
        ResilienceStackBuilder::new()
    }

    pub fn layers(&self) -> &[PolicyLayer] {
        &self.layers
    }

    /// Fold the layers around `transport` into a single pipeline.
    pub fn wrap<S>(&self, transport: S) -> BoxTransport
    where
        S: Service<ApiRequest, Response = ApiResponse, Error = Error> + Clone + Send + Sync + 'static,
        S::Future: Send + 'static,
    {
        self.layers
            .iter()
            .fold(BoxCloneSyncService::new(transport), |inner, layer| layer.wrap(inner))
    }

    /// State of the circuit breaker, if one is configured.
    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.layers.iter().find_map(|layer| match layer {
            PolicyLayer::CircuitBreaker(p) => Some(p.state()),
            _ => None,
        })
    }

    /// Close the breaker and refill the token bucket.
    pub fn reset(&self) {
        for layer in &self.layers {
            match layer {
                PolicyLayer::CircuitBreaker(p) => p.reset(),
                PolicyLayer::RateLimit(p) => p.reset(),
                _ => {}
            }
        }
    }
}

#[derive(Debug, Clone)]
struct RateLimitParams {
    executions: u32,
    window: Duration,
    max_burst: u32,
}

#[derive(Debug, Clone)]
struct RetryParams {
    count: usize,
    backoff: Backoff,
    jitter: Jitter,
}

/// Builder for [`ResilienceStack`]. Policies not configured are left out.
#[derive(Debug, Clone)]
pub struct ResilienceStackBuilder {
    timeout: Option<Duration>,
    rate_limit: Option<RateLimitParams>,
    bulkhead: Option<(usize, usize)>,
    circuit_breaker: Option<(usize, Duration)>,
    retry: Option<RetryParams>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
}

impl ResilienceStackBuilder {
    pub fn new() -> Self {
        Self {
            timeout: None,
            rate_limit: None,
            bulkhead: None,
            circuit_breaker: None,
            retry: None,
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Start from the enabled policies in `settings`.
    pub fn from_settings(settings: &NewsApiSettings) -> Self {
        let mut builder = Self::new();
        if settings.timeout.enabled {
            builder = builder.timeout(Duration::from_secs(settings.timeout.seconds));
        }
        if settings.rate_limit.enabled {
            let rl = &settings.rate_limit;
            builder = builder.rate_limit(rl.executions, Duration::from_secs(rl.window_secs), rl.max_burst);
        }
        if settings.bulkhead.enabled {
            builder = builder.bulkhead(settings.bulkhead.max_parallel, settings.bulkhead.max_queued);
        }
        if settings.circuit_breaker.enabled {
            let cb = &settings.circuit_breaker;
            builder = builder
                .circuit_breaker(cb.failure_threshold, Duration::from_secs(cb.break_duration_secs));
        }
        if settings.retry.enabled {
            let r = &settings.retry;
            let jitter = if r.jitter { Jitter::additive() } else { Jitter::None };
            builder = builder.retry(r.count, Backoff::power(r.backoff_base), jitter);
        }
        builder
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    pub fn rate_limit(mut self, executions: u32, window: Duration, max_burst: u32) -> Self {
        self.rate_limit = Some(RateLimitParams { executions, window, max_burst });
        self
    }

    pub fn bulkhead(mut self, max_parallel: usize, max_queued: usize) -> Self {
        self.bulkhead = Some((max_parallel, max_queued));
        self
    }

    pub fn circuit_breaker(mut self, failure_threshold: usize, break_duration: Duration) -> Self {
        self.circuit_breaker = Some((failure_threshold, break_duration));
        self
    }

    /// `count` retries after the first attempt.
    pub fn retry(mut self, count: usize, backoff: Backoff, jitter: Jitter) -> Self {
        self.retry = Some(RetryParams { count, backoff, jitter });
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub fn no_rate_limit(mut self) -> Self {
        self.rate_limit = None;
        self
    }

    pub fn no_bulkhead(mut self) -> Self {
        self.bulkhead = None;
        self
    }

    pub fn no_circuit_breaker(mut self) -> Self {
        self.circuit_breaker = None;
        self
    }

    pub fn no_retry(mut self) -> Self {
        self.retry = None;
        self
    }

    /// Sleeper used between retries.
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Clock driving the circuit breaker and the token bucket.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Validate the parameters and build the policies, innermost first.
    pub fn build(self) -> Result<ResilienceStack> {
        let mut layers = Vec::new();

        if let Some(duration) = self.timeout {
            layers.push(PolicyLayer::Timeout(TimeoutPolicy::new(duration)?));
        }
        if let Some(rl) = self.rate_limit {
            let bucket =
                TokenBucket::with_clock(rl.executions, rl.window, rl.max_burst, self.clock.clone())?;
            layers.push(PolicyLayer::RateLimit(RateLimitPolicy::new(bucket)));
        }
        if let Some((max_parallel, max_queued)) = self.bulkhead {
            layers.push(PolicyLayer::Bulkhead(BulkheadPolicy::new(max_parallel, max_queued)?));
        }
        if let Some((failures, break_duration)) = self.circuit_breaker {
            let breaker =
                CircuitBreakerPolicy::new(failures, break_duration)?.with_clock(self.clock.clone());
            layers.push(PolicyLayer::CircuitBreaker(breaker));
        }
        if let Some(retry) = self.retry {
            let policy = RetryPolicy::builder()
                .max_retries(retry.count)
                .backoff(retry.backoff)
                .with_jitter(retry.jitter)
                .with_shared_sleeper(self.sleeper)
                .build();
            layers.push(PolicyLayer::Retry(policy));
        }

        tracing::debug!(
            layers = ?layers.iter().map(PolicyLayer::name).collect::<Vec<_>>(),
            "resilience stack built"
        );
        Ok(ResilienceStack { layers })
    }
}

impl Default for ResilienceStackBuilder {
    fn default() -> Self {
        Self::new()
    }
}
