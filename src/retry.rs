//! Retry policy for fallible async operations.
//!
//! Semantics:
//! - `max_retries` counts retries after the initial attempt, so at most `max_retries + 1`
//!   attempts run.
//! - A classifier decides per result whether it is transient. It returns the reason to record,
//!   or `None` to hand the result straight back to the caller. Responses (not just errors) can
//!   be transient, e.g. an HTTP 503.
//! - The delay before retry `n` is `backoff.delay(n)` passed through the jitter.
//! - Sleeper controls how delays are applied (production uses `TokioSleeper`; tests can inject
//!   `InstantSleeper`/`TrackingSleeper`).
//! - When every attempt was transient the caller gets [`Error::TransientUpstream`] carrying the
//!   attempt count and the last reason.
//!
//! ```rust
//! use beststories::{retry::transient_error, Backoff, Error, InstantSleeper, Jitter, RetryPolicy};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::builder()
//!     .max_retries(3)
//!     .backoff(Backoff::power(2))
//!     .with_jitter(Jitter::None)
//!     .with_sleeper(InstantSleeper)
//!     .build();
//! let result: Result<(), Error> = policy
//!     .execute(|| async { Err(Error::Network("reset".into())) }, transient_error)
//!     .await;
//! assert!(result.unwrap_err().is_retry_exhausted());
//! # });
//! ```

use crate::{Backoff, Error, Jitter, Result, Sleeper, TokioSleeper};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;

/// Classifier treating network failures and local rejections as transient.
pub fn transient_error<T>(result: &Result<T>) -> Option<String> {
    match result {
        Err(err @ (Error::Network(_) | Error::RateLimited { .. } | Error::BulkheadRejected { .. })) => {
            Some(err.to_string())
        }
        _ => None,
    }
}

/// Retry policy combining backoff, jitter and sleeper.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: usize,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("sleeper", &self.sleeper)
            .finish()
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Execute an async operation, retrying results the classifier marks as transient.
    pub async fn execute<T, Fut, Op, C>(&self, mut operation: Op, classify: C) -> Result<T>
    where
        Fut: Future<Output = Result<T>> + Send,
        Op: FnMut() -> Fut + Send,
        C: Fn(&Result<T>) -> Option<String>,
    {
        let mut attempt = 0;
        loop {
            let result = operation().await;
            let Some(reason) = classify(&result) else {
                return result;
            };

            attempt += 1;
            if attempt > self.max_retries {
                tracing::warn!(attempts = attempt, last = %reason, "retries exhausted");
                return Err(Error::TransientUpstream { attempts: attempt, last: reason });
            }

            let delay = self.jitter.apply(self.backoff.delay(attempt));
            tracing::warn!(retry = attempt, ?delay, reason = %reason, "transient failure, retrying");
            self.sleeper.sleep(delay).await;
        }
    }
}

/// Builder for `RetryPolicy`.
pub struct RetryPolicyBuilder {
    max_retries: usize,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicyBuilder {
    /// Five retries, `2^n` second backoff, additive jitter up to one second.
    pub fn new() -> Self {
        Self {
            max_retries: 5,
            backoff: Backoff::power(2),
            jitter: Jitter::additive(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Retries after the initial attempt.
    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S>(self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.with_shared_sleeper(Arc::new(sleeper))
    }

    pub fn with_shared_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: self.backoff,
            jitter: self.jitter,
            sleeper: self.sleeper,
        }
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Tower layer retrying the wrapped service with a per-result classifier.
#[derive(Debug, Clone)]
pub struct RetryLayer<F> {
    policy: RetryPolicy,
    classify: F,
}

impl<F> RetryLayer<F> {
    pub fn new(policy: RetryPolicy, classify: F) -> Self {
        Self { policy, classify }
    }
}

impl<S, F: Clone> Layer<S> for RetryLayer<F> {
    type Service = RetryService<S, F>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService { inner, policy: self.policy.clone(), classify: self.classify.clone() }
    }
}

/// Retry service produced by `RetryLayer`.
#[derive(Debug, Clone)]
pub struct RetryService<S, F> {
    inner: S,
    policy: RetryPolicy,
    classify: F,
}

impl<S, F, Request> Service<Request> for RetryService<S, F>
where
    Request: Clone + Send + 'static,
    S: Service<Request, Error = Error> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Future: Send + 'static,
    F: Fn(&Result<S::Response>) -> Option<String> + Clone + Send + Sync + 'static,
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
        Box::pin(async move {
            policy.execute(move || inner.clone().oneshot(req.clone()), classify).await
        })
    }
}
