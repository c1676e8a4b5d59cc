//! Typed client for the news API.
//!
//! Every call emits one `info` event before dispatch. A received response adds one more `info`
//! event, and any failure (transport, non-2xx status, undecodable payload) is reported by
//! exactly one `error` event before it is returned.

use crate::config::NewsApiSettings;
use crate::models::{Story, StoryId};
use crate::stack::{ResilienceStack, ResilienceStackBuilder};
use crate::transport::{ApiRequest, ApiResponse, BoxTransport, HttpTransport};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Operations the aggregator needs from the upstream API.
#[async_trait]
pub trait NewsApi: Send + Sync {
    /// Ids of the current best stories, in upstream order.
    async fn best_story_ids(&self, cancel: &CancellationToken) -> Result<Vec<StoryId>>;

    /// Full record for one story.
    async fn story(&self, id: StoryId, cancel: &CancellationToken) -> Result<Story>;
}

/// [`NewsApi`] over a resilience-wrapped transport.
#[derive(Clone)]
pub struct NewsApiClient {
    pipeline: BoxTransport,
    stack: ResilienceStack,
}

impl std::fmt::Debug for NewsApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewsApiClient").field("stack", &self.stack).finish_non_exhaustive()
    }
}

impl NewsApiClient {
    /// HTTP transport plus every policy enabled in `settings`.
    pub fn from_settings(settings: &NewsApiSettings) -> Result<Self> {
        settings.validate()?;
        let transport = HttpTransport::new(&settings.base_url, settings.handler_lifetime())?;
        let stack = ResilienceStackBuilder::from_settings(settings).build()?;
        Ok(Self::new(transport, stack))
    }

    pub fn new<S>(transport: S, stack: ResilienceStack) -> Self
    where
        S: tower_service::Service<ApiRequest, Response = ApiResponse, Error = Error>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        Self { pipeline: stack.wrap(transport), stack }
    }

    /// Policies wrapping this client, e.g. to inspect or reset breaker state.
    pub fn stack(&self) -> &ResilienceStack {
        &self.stack
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, cancel: &CancellationToken) -> Result<T> {
        tracing::info!(path, "GET request");

        let call = self.pipeline.clone().oneshot(ApiRequest::get(path));
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = call => result,
        };

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(path, error = %err, "GET request failed");
                return Err(err);
            }
        };

        tracing::info!(path, status = response.status, bytes = response.body.len(), "GET response received");

        if !response.is_success() {
            tracing::error!(path, status = response.status, "GET request failed with non-success status");
            return Err(Error::NonSuccessStatus { code: response.status });
        }

        serde_json::from_slice(&response.body).map_err(|e| {
            tracing::error!(path, error = %e, "GET response could not be decoded");
            Error::MalformedResponse(e.to_string())
        })
    }
}

#[async_trait]
impl NewsApi for NewsApiClient {
    async fn best_story_ids(&self, cancel: &CancellationToken) -> Result<Vec<StoryId>> {
        self.get("beststories.json", cancel).await
    }

    async fn story(&self, id: StoryId, cancel: &CancellationToken) -> Result<Story> {
        self.get(&format!("item/{id}.json"), cancel).await
    }
}
