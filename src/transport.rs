//! Outbound HTTP call path and the request/response types every policy layer speaks.
//!
//! The transport itself only reports what happened on the wire: any HTTP status is an `Ok`
//! response, and only a missing response is an [`Error::Network`]. Deciding which statuses are
//! failures is left to the classifiers below and to the fetch client.

use crate::circuit_breaker::BreakerOutcome;
use crate::{Error, Result};
use futures::future::BoxFuture;
use reqwest::Url;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::util::BoxCloneSyncService;
use tower_service::Service;

/// Type-erased request pipeline: the transport wrapped in zero or more policy layers.
pub type BoxTransport = BoxCloneSyncService<ApiRequest, ApiResponse, Error>;

/// A GET for a path relative to the API base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    path: String,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Status and raw body of an upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self { status, body: body.into() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 5xx or 408.
    pub fn is_transient_failure(&self) -> bool {
        self.status >= 500 || self.status == 408
    }
}

/// Retry classifier for the HTTP pipeline: network errors, 5xx, 408 and 429 responses, and
/// rejections by the rate limiter or bulkhead are worth another attempt.
pub fn retry_reason(result: &Result<ApiResponse>) -> Option<String> {
    match result {
        Ok(resp) if resp.is_transient_failure() || resp.status == 429 => {
            Some(format!("upstream responded with status {}", resp.status))
        }
        Ok(_) => None,
        Err(_) => crate::retry::transient_error(result),
    }
}

/// Breaker classifier for the HTTP pipeline: network errors, 5xx and 408 count as failures.
/// A 429 is a success as far as the breaker is concerned; local rejections and timeouts are
/// ignored.
pub fn breaker_outcome(result: &Result<ApiResponse>) -> BreakerOutcome {
    match result {
        Ok(resp) if resp.is_transient_failure() => BreakerOutcome::Failure,
        Ok(_) => BreakerOutcome::Success,
        Err(Error::Network(_)) => BreakerOutcome::Failure,
        Err(_) => BreakerOutcome::Ignored,
    }
}

/// `reqwest`-backed transport resolving request paths against a base URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    /// Build a transport whose idle pooled connections are dropped after `handler_lifetime`.
    pub fn new(base_url: &str, handler_lifetime: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(handler_lifetime)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;
        Self::with_client(client, base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self> {
        let mut base = base_url.to_owned();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url =
            Url::parse(&base).map_err(|e| Error::config(format!("invalid base url {base_url:?}: {e}")))?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute URL for a request path.
    pub fn url_for(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::config(format!("invalid request path {path:?}: {e}")))
    }
}

impl Service<ApiRequest> for HttpTransport {
    type Response = ApiResponse;
    type Error = Error;
    type Future = BoxFuture<'static, Result<ApiResponse>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ApiRequest) -> Self::Future {
        let client = self.client.clone();
        let url = self.url_for(req.path());
        Box::pin(async move {
            let url = url?;
            tracing::debug!(%url, "dispatching GET");
            let response = client.get(url).send().await?;
            let status = response.status().as_u16();
            let body = response.bytes().await?;
            Ok(ApiResponse { status, body: body.to_vec() })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_trailing_slash() {
        let transport =
            HttpTransport::with_client(reqwest::Client::new(), "https://hacker-news.firebaseio.com/v0")
                .expect("valid url");
        assert_eq!(
            transport.url_for("item/8863.json").unwrap().as_str(),
            "https://hacker-news.firebaseio.com/v0/item/8863.json"
        );
        assert_eq!(
            transport.url_for("/beststories.json").unwrap().as_str(),
            "https://hacker-news.firebaseio.com/v0/beststories.json"
        );
    }

    #[test]
    fn rejects_invalid_base_url() {
        let err = HttpTransport::with_client(reqwest::Client::new(), "not a url").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn retry_classifier_covers_transient_statuses() {
        for status in [500, 502, 503, 408, 429] {
            assert!(retry_reason(&Ok(ApiResponse::new(status, ""))).is_some(), "{status}");
        }
        for status in [200, 400, 401, 404] {
            assert!(retry_reason(&Ok(ApiResponse::new(status, ""))).is_none(), "{status}");
        }
        assert!(retry_reason(&Err(Error::Network("reset".into()))).is_some());
        assert!(retry_reason(&Err(Error::RateLimited { wait: Duration::from_millis(1) })).is_some());
        assert!(retry_reason(&Err(Error::BulkheadRejected { occupied: 1, capacity: 1 })).is_some());
        assert!(retry_reason(&Err(Error::CircuitOpen {
            failure_count: 5,
            open_duration: Duration::ZERO
        }))
        .is_none());
    }

    #[test]
    fn breaker_classifier_ignores_throttling() {
        assert_eq!(breaker_outcome(&Ok(ApiResponse::new(429, ""))), BreakerOutcome::Success);
        assert_eq!(breaker_outcome(&Ok(ApiResponse::new(404, ""))), BreakerOutcome::Success);
        assert_eq!(breaker_outcome(&Ok(ApiResponse::new(500, ""))), BreakerOutcome::Failure);
        assert_eq!(breaker_outcome(&Ok(ApiResponse::new(408, ""))), BreakerOutcome::Failure);
        assert_eq!(breaker_outcome(&Err(Error::Network("dns".into()))), BreakerOutcome::Failure);
        assert_eq!(
            breaker_outcome(&Err(Error::BulkheadRejected { occupied: 1, capacity: 1 })),
            BreakerOutcome::Ignored
        );
    }
}
