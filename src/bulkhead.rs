//! Bulkhead: caps in-flight calls and bounds the queue of callers waiting for a slot.

use crate::{Error, Result};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::Semaphore;
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;

/// At most `max_parallel` operations run at once; up to `max_queued` more wait for a slot.
/// Anything beyond that is rejected with [`Error::BulkheadRejected`] without waiting.
///
/// Clones share the same slots.
#[derive(Debug, Clone)]
pub struct BulkheadPolicy {
    admission: Arc<Semaphore>,
    execution: Arc<Semaphore>,
    max_parallel: usize,
    max_queued: usize,
}

impl BulkheadPolicy {
    pub fn new(max_parallel: usize, max_queued: usize) -> Result<Self> {
        if max_parallel == 0 {
            return Err(Error::config("bulkhead max_parallel must be > 0"));
        }
        let capacity = max_parallel
            .checked_add(max_queued)
            .filter(|c| *c <= Semaphore::MAX_PERMITS)
            .ok_or_else(|| Error::config("bulkhead capacity exceeds the semaphore limit"))?;
        Ok(Self {
            admission: Arc::new(Semaphore::new(capacity)),
            execution: Arc::new(Semaphore::new(max_parallel)),
            max_parallel,
            max_queued,
        })
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn max_queued(&self) -> usize {
        self.max_queued
    }

    /// Operations currently admitted (running or queued).
    pub fn occupied(&self) -> usize {
        self.capacity().saturating_sub(self.admission.available_permits())
    }

    fn capacity(&self) -> usize {
        self.max_parallel + self.max_queued
    }

    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T>
    where
        Fut: Future<Output = Result<T>> + Send,
        Op: FnOnce() -> Fut + Send,
    {
        let _admitted = self.admission.clone().try_acquire_owned().map_err(|_| {
            let occupied = self.occupied();
            tracing::warn!(occupied, capacity = self.capacity(), "bulkhead full, rejecting call");
            Error::BulkheadRejected { occupied, capacity: self.capacity() }
        })?;

        let _slot = self
            .execution
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::BulkheadRejected { occupied: self.occupied(), capacity: self.capacity() })?;

        operation().await
    }
}

#[derive(Debug, Clone)]
pub struct BulkheadLayer {
    policy: BulkheadPolicy,
}

impl BulkheadLayer {
    pub fn new(policy: BulkheadPolicy) -> Self {
        Self { policy }
    }
}

impl<S> Layer<S> for BulkheadLayer {
    type Service = BulkheadService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BulkheadService { inner, policy: self.policy.clone() }
    }
}

#[derive(Debug, Clone)]
pub struct BulkheadService<S> {
    inner: S,
    policy: BulkheadPolicy,
}

impl<S, Request> Service<Request> for BulkheadService<S>
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
