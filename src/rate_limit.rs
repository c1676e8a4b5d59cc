//! Rate limiting primitives.
//!
//! - [`RateLimiter`]: the admission decision, independent of how it is computed.
//! - [`TokenBucket`]: `executions` tokens per `window`, holding at most `max_burst`.
//! - [`RateLimitPolicy`] / [`RateLimitLayer`]: reject over-budget calls immediately with
//!   [`Error::RateLimited`], carrying the wait until the next token.

use crate::clock::{Clock, MonotonicClock};
use crate::{Error, Result};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;

/// The decision returned by a rate limiter.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The request may proceed.
    Allowed {
        /// Whole permits left after this acquisition.
        remaining: u32,
    },
    /// The request is over budget.
    Denied {
        /// How long until enough permits are available.
        wait: Duration,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Core interface for rate limiting logic.
pub trait RateLimiter: Send + Sync + std::fmt::Debug {
    /// Attempt to take `permits` from the budget.
    fn try_acquire(&self, permits: u32) -> Decision;

    /// Restore the limiter to its initial budget.
    fn reset(&self);
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill_millis: u64,
}

/// Token bucket refilled continuously at `executions / window`, capped at `capacity`.
///
/// The bucket starts full, so up to `capacity` calls can burst before the refill rate applies.
#[derive(Debug)]
pub struct TokenBucket {
    millis_per_token: f64,
    capacity: f64,
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    pub fn new(executions: u32, window: Duration, max_burst: u32) -> Result<Self> {
        Self::with_clock(executions, window, max_burst, MonotonicClock::default())
    }

    pub fn with_clock<C: Clock + 'static>(
        executions: u32,
        window: Duration,
        max_burst: u32,
        clock: C,
    ) -> Result<Self> {
        if executions == 0 {
            return Err(Error::config("rate limit executions must be > 0"));
        }
        if window.is_zero() {
            return Err(Error::config("rate limit window must be > 0"));
        }
        if max_burst == 0 {
            return Err(Error::config("rate limit max_burst must be > 0"));
        }
        let clock: Arc<dyn Clock> = Arc::new(clock);
        let capacity = f64::from(max_burst);
        Ok(Self {
            millis_per_token: window.as_millis() as f64 / f64::from(executions),
            capacity,
            state: Mutex::new(BucketState { tokens: capacity, last_refill_millis: clock.now_millis() }),
            clock,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }
}

impl RateLimiter for TokenBucket {
    fn try_acquire(&self, permits: u32) -> Decision {
        let cost = f64::from(permits);
        let now = self.clock.now_millis();
        let mut state = self.state.lock();

        let elapsed = now.saturating_sub(state.last_refill_millis) as f64;
        state.tokens = (state.tokens + elapsed / self.millis_per_token).min(self.capacity);
        state.last_refill_millis = now;

        if state.tokens >= cost {
            state.tokens -= cost;
            Decision::Allowed { remaining: state.tokens as u32 }
        } else {
            let missing = cost - state.tokens;
            let wait_millis = (missing * self.millis_per_token).ceil() as u64;
            Decision::Denied { wait: Duration::from_millis(wait_millis) }
        }
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.tokens = self.capacity;
        state.last_refill_millis = self.clock.now_millis();
    }
}

/// Rejects calls the limiter denies. Clones share the limiter.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    limiter: Arc<dyn RateLimiter>,
}

impl RateLimitPolicy {
    pub fn new<L: RateLimiter + 'static>(limiter: L) -> Self {
        Self { limiter: Arc::new(limiter) }
    }

    pub fn reset(&self) {
        self.limiter.reset();
    }

    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T>
    where
        Fut: Future<Output = Result<T>> + Send,
        Op: FnOnce() -> Fut + Send,
    {
        match self.limiter.try_acquire(1) {
            Decision::Allowed { remaining } => {
                tracing::trace!(remaining, "rate limit permit acquired");
                operation().await
            }
            Decision::Denied { wait } => {
                tracing::debug!(?wait, "rate limit exceeded");
                Err(Error::RateLimited { wait })
            }
        }
    }
}

/// A layer that enforces a [`RateLimitPolicy`] on every call.
#[derive(Clone, Debug)]
pub struct RateLimitLayer {
    policy: RateLimitPolicy,
}

impl RateLimitLayer {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self { policy }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService { inner, policy: self.policy.clone() }
    }
}

#[derive(Clone, Debug)]
pub struct RateLimitService<S> {
    inner: S,
    policy: RateLimitPolicy,
}

impl<S, Request> Service<Request> for RateLimitService<S>
where
    Request: Send + 'static,
    S: Service<Request, Error = Error> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Future: Send + 'static,
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
        Box::pin(async move { policy.execute(|| inner.oneshot(req)).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn rejects_invalid_parameters() {
        assert!(TokenBucket::new(0, Duration::from_secs(1), 10).is_err());
        assert!(TokenBucket::new(5, Duration::ZERO, 10).is_err());
        assert!(TokenBucket::new(5, Duration::from_secs(1), 0).is_err());
    }

    #[test]
    fn bucket_starts_full_and_allows_a_burst() {
        let clock = ManualClock::new();
        let bucket = TokenBucket::with_clock(5, Duration::from_secs(1), 10, clock).expect("valid");

        for expected_remaining in (0..10).rev() {
            assert_eq!(bucket.try_acquire(1), Decision::Allowed { remaining: expected_remaining });
        }
        assert!(!bucket.try_acquire(1).is_allowed());
    }

    #[test]
    fn denied_decision_reports_wait_for_next_token() {
        let clock = ManualClock::new();
        let bucket = TokenBucket::with_clock(5, Duration::from_secs(1), 1, clock).expect("valid");

        assert!(bucket.try_acquire(1).is_allowed());
        assert_eq!(bucket.try_acquire(1), Decision::Denied { wait: Duration::from_millis(200) });
    }

    #[test]
    fn bucket_refills_at_configured_rate() {
        let clock = ManualClock::new();
        let bucket =
            TokenBucket::with_clock(5, Duration::from_secs(1), 10, clock.clone()).expect("valid");
        for _ in 0..10 {
            bucket.try_acquire(1);
        }
        assert!(!bucket.try_acquire(1).is_allowed());

        clock.advance(Duration::from_millis(200));
        assert!(bucket.try_acquire(1).is_allowed());
        assert!(!bucket.try_acquire(1).is_allowed());

        clock.advance(Duration::from_secs(1));
        for _ in 0..5 {
            assert!(bucket.try_acquire(1).is_allowed());
        }
        assert!(!bucket.try_acquire(1).is_allowed());
    }

    #[test]
    fn refill_never_exceeds_capacity() {
        let clock = ManualClock::new();
        let bucket =
            TokenBucket::with_clock(5, Duration::from_secs(1), 3, clock.clone()).expect("valid");
        clock.advance(Duration::from_secs(60));
        assert_eq!(bucket.try_acquire(1), Decision::Allowed { remaining: 2 });
    }

    #[test]
    fn reset_restores_full_budget() {
        let clock = ManualClock::new();
        let bucket = TokenBucket::with_clock(1, Duration::from_secs(10), 2, clock).expect("valid");
        bucket.try_acquire(1);
        bucket.try_acquire(1);
        assert!(!bucket.try_acquire(1).is_allowed());

        bucket.reset();
        assert!(bucket.try_acquire(1).is_allowed());
    }

    #[tokio::test]
    async fn policy_rejects_without_running_operation() {
        let clock = ManualClock::new();
        let policy = RateLimitPolicy::new(
            TokenBucket::with_clock(1, Duration::from_secs(1), 1, clock).expect("valid"),
        );

        assert_eq!(policy.execute(|| async { Ok(1) }).await.unwrap(), 1);

        let ran = std::sync::atomic::AtomicBool::new(false);
        let result = policy
            .execute(|| async {
                ran.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(2)
            })
            .await;
        assert!(result.unwrap_err().is_rate_limited());
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));

        policy.reset();
        assert_eq!(policy.execute(|| async { Ok(3) }).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn layer_shares_budget_across_clones() {
        let clock = ManualClock::new();
        let policy = RateLimitPolicy::new(
            TokenBucket::with_clock(1, Duration::from_secs(1), 2, clock).expect("valid"),
        );
        let svc = RateLimitLayer::new(policy)
            .layer(tower::service_fn(|n: u32| async move { Ok::<_, Error>(n) }));

        assert!(svc.clone().oneshot(1).await.is_ok());
        assert!(svc.clone().oneshot(2).await.is_ok());
        assert!(svc.oneshot(3).await.unwrap_err().is_rate_limited());
    }
}
