//! Circuit breaker implementation with lock-free atomics.
//!
//! What counts as a failure is decided per call by a classifier, so the HTTP pipeline can open
//! on network errors and 5xx responses while treating a 429 or a local rejection as neutral.

use crate::clock::{Clock, MonotonicClock};
use crate::{Error, Result};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operating mode.
    Closed,
    /// Short-circuits calls until the break duration elapses.
    Open,
    /// Probe mode allowing a limited number of calls to test recovery.
    HalfOpen,
}

impl CircuitState {
    fn from_u8(v: u8) -> Self {
        match v {
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// How a finished call affects the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerOutcome {
    /// Resets the consecutive-failure count; closes a half-open breaker.
    Success,
    /// Counts toward opening; re-opens a half-open breaker.
    Failure,
    /// Leaves the counters untouched.
    Ignored,
}

impl BreakerOutcome {
    /// Every `Err` is a failure, every `Ok` a success.
    pub fn of<T>(result: &Result<T>) -> Self {
        if result.is_ok() {
            BreakerOutcome::Success
        } else {
            BreakerOutcome::Failure
        }
    }
}

/// Validated configuration for the circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    failure_threshold: usize,
    break_duration: Duration,
    half_open_max_calls: usize,
}

impl CircuitBreakerConfig {
    pub fn new(
        failure_threshold: usize,
        break_duration: Duration,
        half_open_max_calls: usize,
    ) -> Result<Self> {
        if failure_threshold == 0 {
            return Err(Error::config("circuit breaker failure_threshold must be > 0"));
        }
        if break_duration.is_zero() {
            return Err(Error::config("circuit breaker break_duration must be > 0"));
        }
        if half_open_max_calls == 0 {
            return Err(Error::config("circuit breaker half_open_max_calls must be > 0"));
        }
        Ok(Self { failure_threshold, break_duration, half_open_max_calls })
    }

    /// Consecutive failures before opening from Closed.
    pub fn failure_threshold(&self) -> usize {
        self.failure_threshold
    }

    /// How long to stay Open before letting a probe through.
    pub fn break_duration(&self) -> Duration {
        self.break_duration
    }

    pub fn half_open_max_calls(&self) -> usize {
        self.half_open_max_calls
    }
}

#[derive(Debug)]
struct CircuitBreakerState {
    state: AtomicU8,
    failure_count: AtomicUsize,
    opened_at_millis: AtomicU64,
    half_open_calls: AtomicUsize,
}

/// Circuit breaker policy guarding an async operation.
///
/// Clones share the same underlying state via `Arc`, so all handles observe and affect the same
/// circuit lifecycle.
#[derive(Debug, Clone)]
pub struct CircuitBreakerPolicy {
    state: Arc<CircuitBreakerState>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerPolicy {
    /// Create a breaker allowing one half-open probe at a time.
    ///
    /// ```
    /// use beststories::CircuitBreakerPolicy;
    /// use std::time::Duration;
    /// let breaker = CircuitBreakerPolicy::new(5, Duration::from_secs(30)).unwrap();
    /// ```
    pub fn new(failure_threshold: usize, break_duration: Duration) -> Result<Self> {
        Ok(Self::with_config(CircuitBreakerConfig::new(failure_threshold, break_duration, 1)?))
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Arc::new(CircuitBreakerState {
                state: AtomicU8::new(STATE_CLOSED),
                failure_count: AtomicUsize::new(0),
                opened_at_millis: AtomicU64::new(0),
                half_open_calls: AtomicUsize::new(0),
            }),
            config,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.state.load(Ordering::Acquire))
    }

    /// Return to Closed with no recorded failures.
    pub fn reset(&self) {
        self.state.state.store(STATE_CLOSED, Ordering::Release);
        self.state.failure_count.store(0, Ordering::Release);
        self.state.opened_at_millis.store(0, Ordering::Release);
        self.state.half_open_calls.store(0, Ordering::Release);
        tracing::debug!("Circuit breaker reset → closed");
    }

    /// Execute `operation` under breaker protection, feeding its result through `classify`.
    ///
    /// - **Closed**: runs normally; consecutive failures trip the breaker at the threshold.
    /// - **Open**: rejects with [`Error::CircuitOpen`] until the break duration elapses.
    /// - **HalfOpen**: admits up to `half_open_max_calls` probes; success closes, failure re-opens.
    pub async fn execute<T, Fut, Op, C>(&self, operation: Op, classify: C) -> Result<T>
    where
        Fut: Future<Output = Result<T>> + Send,
        Op: FnOnce() -> Fut + Send,
        C: Fn(&Result<T>) -> BreakerOutcome,
    {
        struct HalfOpenGuard<'a> {
            state: &'a CircuitBreakerState,
        }
        impl Drop for HalfOpenGuard<'_> {
            fn drop(&mut self) {
                let _ = self.state.half_open_calls.fetch_update(
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    |n| n.checked_sub(1),
                );
            }
        }
        let mut guard: Option<HalfOpenGuard<'_>> = None;

        loop {
            match self.state() {
                CircuitState::Open => {
                    let elapsed = self.open_elapsed();
                    if elapsed < self.config.break_duration {
                        return Err(self.open_error(elapsed));
                    }
                    match self.state.state.compare_exchange(
                        STATE_OPEN,
                        STATE_HALF_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            tracing::debug!("Circuit breaker → half-open");
                            self.state.half_open_calls.store(1, Ordering::Release);
                            guard = Some(HalfOpenGuard { state: &self.state });
                            break;
                        }
                        // Lost the race; re-read whatever state won.
                        Err(_) => continue,
                    }
                }
                CircuitState::HalfOpen => {
                    let current = self.state.half_open_calls.fetch_add(1, Ordering::AcqRel);
                    if current >= self.config.half_open_max_calls {
                        self.state.half_open_calls.fetch_sub(1, Ordering::Release);
                        return Err(self.open_error(self.open_elapsed()));
                    }
                    guard = Some(HalfOpenGuard { state: &self.state });
                    tracing::debug!(
                        in_flight = current + 1,
                        max = self.config.half_open_max_calls,
                        "Circuit breaker: half-open probe"
                    );
                    break;
                }
                CircuitState::Closed => break,
            }
        }

        let result = operation().await;
        drop(guard);

        match classify(&result) {
            BreakerOutcome::Success => self.on_success(),
            BreakerOutcome::Failure => self.on_failure(),
            BreakerOutcome::Ignored => {}
        }

        result
    }

    fn open_elapsed(&self) -> Duration {
        let opened_at = self.state.opened_at_millis.load(Ordering::Acquire);
        Duration::from_millis(self.clock.now_millis().saturating_sub(opened_at))
    }

    fn open_error(&self, open_duration: Duration) -> Error {
        Error::CircuitOpen {
            failure_count: self.state.failure_count.load(Ordering::Acquire),
            open_duration,
        }
    }

    /// Any success in the closed state resets the counter, so only consecutive failures trip
    /// the breaker.
    fn on_success(&self) {
        match self.state() {
            CircuitState::HalfOpen => {
                if self
                    .state
                    .state
                    .compare_exchange(
                        STATE_HALF_OPEN,
                        STATE_CLOSED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.state.half_open_calls.store(0, Ordering::Release);
                    self.state.failure_count.store(0, Ordering::Release);
                    self.state.opened_at_millis.store(0, Ordering::Release);
                    tracing::debug!("Circuit breaker → closed");
                }
            }
            CircuitState::Closed => {
                self.state.failure_count.store(0, Ordering::Release);
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let current = self.state();
        let failures = self.state.failure_count.fetch_add(1, Ordering::AcqRel) + 1;

        match current {
            CircuitState::HalfOpen => {
                if self
                    .state
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.state.half_open_calls.store(0, Ordering::Release);
                    self.state.opened_at_millis.store(self.clock.now_millis(), Ordering::Release);
                    tracing::warn!(failures, "Circuit breaker: probe failed → open");
                }
            }
            CircuitState::Closed => {
                if failures >= self.config.failure_threshold
                    && self
                        .state
                        .state
                        .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    self.state.half_open_calls.store(0, Ordering::Release);
                    self.state.opened_at_millis.store(self.clock.now_millis(), Ordering::Release);
                    tracing::warn!(
                        failures,
                        threshold = self.config.failure_threshold,
                        break_duration = ?self.config.break_duration,
                        "Circuit breaker → open"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }
}

/// Tower layer applying a [`CircuitBreakerPolicy`] with a per-call classifier.
#[derive(Debug, Clone)]
pub struct CircuitBreakerLayer<F> {
    policy: CircuitBreakerPolicy,
    classify: F,
}

impl<F> CircuitBreakerLayer<F> {
    pub fn new(policy: CircuitBreakerPolicy, classify: F) -> Self {
        Self { policy, classify }
    }
}

impl<S, F: Clone> Layer<S> for CircuitBreakerLayer<F> {
    type Service = CircuitBreakerService<S, F>;

    fn layer(&self, inner: S) -> Self::Service {
        CircuitBreakerService {
            inner,
            policy: self.policy.clone(),
            classify: self.classify.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerService<S, F> {
    inner: S,
    policy: CircuitBreakerPolicy,
    classify: F,
}

impl<S, F, Request> Service<Request> for CircuitBreakerService<S, F>
where
    Request: Send + 'static,
    S: Service<Request, Error = Error> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Future: Send + 'static,
    F: Fn(&Result<S::Response>) -> BreakerOutcome + Clone + Send + Sync + 'static,
{
    type Response = S::Response;
    type Error = Error;
    type Future = BoxFuture<'static, Result<S::Response>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let inner = self.inner.clone();
        let policy = self.policy.clone();
        let classify = self.classify.clone();
        Box::pin(async move { policy.execute(|| inner.oneshot(req), classify).await })
    }
}
