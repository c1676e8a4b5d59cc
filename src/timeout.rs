//! Per-attempt timeout policy.

use crate::{Error, Result};
use futures::future::BoxFuture;
use std::future::Future;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::Instant;
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;

/// Upper bound accepted for a timeout (1 day).
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    duration: Duration,
}

impl TimeoutPolicy {
    /// Create a timeout policy. The duration must be non-zero and at most [`MAX_TIMEOUT`].
    pub fn new(duration: Duration) -> Result<Self> {
        if duration.is_zero() || duration > MAX_TIMEOUT {
            return Err(Error::config(format!(
                "timeout must be in (0, {MAX_TIMEOUT:?}] (got {duration:?})"
            )));
        }
        Ok(Self { duration })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T>
    where
        Fut: Future<Output = Result<T>> + Send,
        Op: FnOnce() -> Fut + Send,
    {
        let start = Instant::now();

        match tokio::time::timeout(self.duration, operation()).await {
            Ok(result) => result,
            Err(_) => {
                let elapsed = start.elapsed();
                tracing::warn!(?elapsed, timeout = ?self.duration, "attempt timed out");
                Err(Error::Timeout { elapsed, timeout: self.duration })
            }
        }
    }
}

/// Tower layer bounding each call of the wrapped service.
#[derive(Debug, Clone)]
pub struct TimeoutLayer {
    policy: TimeoutPolicy,
}

impl TimeoutLayer {
    pub fn new(policy: TimeoutPolicy) -> Self {
        Self { policy }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner, policy: self.policy }
    }
}

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    policy: TimeoutPolicy,
}

impl<S, Request> Service<Request> for TimeoutService<S>
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
        let policy = self.policy;
        Box::pin(async move { policy.execute(|| inner.oneshot(req)).await })
    }
}
