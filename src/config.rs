//! Settings for the news API pipeline and the best-stories handler.
//!
//! Every field has a default, so a partial JSON document (or none at all) yields a complete
//! configuration:
//!
//! ```rust
//! use beststories::Settings;
//!
//! let settings = Settings::from_json_str(r#"{ "news_api": { "retry": { "count": 3 } } }"#).unwrap();
//! assert_eq!(settings.news_api.retry.count, 3);
//! assert_eq!(settings.news_api.retry.backoff_base, 2);
//! assert_eq!(settings.best_stories.cache_key, "best-stories");
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://hacker-news.firebaseio.com/v0/";
pub const DEFAULT_HANDLER_LIFETIME_MINS: u64 = 2;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RATE_LIMIT_EXECUTIONS: u32 = 5;
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 1;
pub const DEFAULT_RATE_LIMIT_MAX_BURST: u32 = 10;
pub const DEFAULT_BULKHEAD_MAX_PARALLEL: usize = 10;
pub const DEFAULT_BULKHEAD_MAX_QUEUED: usize = 20;
pub const DEFAULT_BREAKER_FAILURE_THRESHOLD: usize = 5;
pub const DEFAULT_BREAKER_BREAK_SECS: u64 = 30;
pub const DEFAULT_RETRY_COUNT: usize = 5;
pub const DEFAULT_RETRY_BACKOFF_BASE: u32 = 2;
pub const DEFAULT_CACHE_TTL_MINS: u64 = 15;
pub const DEFAULT_CACHE_KEY: &str = "best-stories";
pub const DEFAULT_MAX_DEGREE_OF_PARALLELISM: usize = 20;

/// Root settings document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub news_api: NewsApiSettings,
    pub best_stories: BestStoriesSettings,
}

impl Settings {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("failed to parse settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.news_api.validate()?;
        self.best_stories.validate()
    }
}

/// Upstream endpoint and the policies wrapping every call to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsApiSettings {
    pub base_url: String,
    /// Idle lifetime of pooled connections.
    pub handler_lifetime_mins: u64,
    pub timeout: TimeoutSettings,
    pub rate_limit: RateLimitSettings,
    pub bulkhead: BulkheadSettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub retry: RetrySettings,
}

impl Default for NewsApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            handler_lifetime_mins: DEFAULT_HANDLER_LIFETIME_MINS,
            timeout: TimeoutSettings::default(),
            rate_limit: RateLimitSettings::default(),
            bulkhead: BulkheadSettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl NewsApiSettings {
    pub fn handler_lifetime(&self) -> Duration {
        Duration::from_secs(self.handler_lifetime_mins.saturating_mul(60))
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(Error::config("news_api.base_url must not be empty"));
        }
        if self.timeout.enabled && self.timeout.seconds == 0 {
            return Err(Error::config("news_api.timeout.seconds must be > 0"));
        }
        if self.rate_limit.enabled {
            let rl = &self.rate_limit;
            if rl.executions == 0 || rl.window_secs == 0 || rl.max_burst == 0 {
                return Err(Error::config(
                    "news_api.rate_limit executions, window_secs and max_burst must be > 0",
                ));
            }
        }
        if self.bulkhead.enabled && self.bulkhead.max_parallel == 0 {
            return Err(Error::config("news_api.bulkhead.max_parallel must be > 0"));
        }
        if self.circuit_breaker.enabled {
            let cb = &self.circuit_breaker;
            if cb.failure_threshold == 0 || cb.break_duration_secs == 0 {
                return Err(Error::config(
                    "news_api.circuit_breaker failure_threshold and break_duration_secs must be > 0",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub enabled: bool,
    pub seconds: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self { enabled: true, seconds: DEFAULT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub executions: u32,
    pub window_secs: u64,
    pub max_burst: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            executions: DEFAULT_RATE_LIMIT_EXECUTIONS,
            window_secs: DEFAULT_RATE_LIMIT_WINDOW_SECS,
            max_burst: DEFAULT_RATE_LIMIT_MAX_BURST,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkheadSettings {
    pub enabled: bool,
    pub max_parallel: usize,
    pub max_queued: usize,
}

impl Default for BulkheadSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_parallel: DEFAULT_BULKHEAD_MAX_PARALLEL,
            max_queued: DEFAULT_BULKHEAD_MAX_QUEUED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub enabled: bool,
    pub failure_threshold: usize,
    pub break_duration_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: DEFAULT_BREAKER_FAILURE_THRESHOLD,
            break_duration_secs: DEFAULT_BREAKER_BREAK_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub enabled: bool,
    /// Retries after the first attempt.
    pub count: usize,
    /// Delay before retry `n` is `backoff_base^n` seconds.
    pub backoff_base: u32,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            count: DEFAULT_RETRY_COUNT,
            backoff_base: DEFAULT_RETRY_BACKOFF_BASE,
            jitter: true,
        }
    }
}

/// Handler-level knobs: caching and fan-out width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BestStoriesSettings {
    pub cache_enabled: bool,
    pub cache_ttl_mins: u64,
    pub cache_key: String,
    pub max_degree_of_parallelism: usize,
}

impl Default for BestStoriesSettings {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl_mins: DEFAULT_CACHE_TTL_MINS,
            cache_key: DEFAULT_CACHE_KEY.to_owned(),
            max_degree_of_parallelism: DEFAULT_MAX_DEGREE_OF_PARALLELISM,
        }
    }
}

impl BestStoriesSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_mins.saturating_mul(60))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_degree_of_parallelism == 0 {
            return Err(Error::config("best_stories.max_degree_of_parallelism must be > 0"));
        }
        if self.cache_enabled {
            if self.cache_ttl_mins == 0 {
                return Err(Error::config("best_stories.cache_ttl_mins must be > 0"));
            }
            if self.cache_key.is_empty() {
                return Err(Error::config("best_stories.cache_key must not be empty"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        let api = &settings.news_api;
        assert_eq!(api.base_url, "https://hacker-news.firebaseio.com/v0/");
        assert_eq!(api.handler_lifetime(), Duration::from_secs(120));
        assert!(api.timeout.enabled);
        assert_eq!(api.timeout.seconds, 30);
        assert_eq!((api.rate_limit.executions, api.rate_limit.window_secs, api.rate_limit.max_burst), (5, 1, 10));
        assert_eq!((api.bulkhead.max_parallel, api.bulkhead.max_queued), (10, 20));
        assert_eq!(
            (api.circuit_breaker.failure_threshold, api.circuit_breaker.break_duration_secs),
            (5, 30)
        );
        assert_eq!((api.retry.count, api.retry.backoff_base, api.retry.jitter), (5, 2, true));

        let best = &settings.best_stories;
        assert!(best.cache_enabled);
        assert_eq!(best.cache_ttl(), Duration::from_secs(15 * 60));
        assert_eq!(best.cache_key, "best-stories");
        assert_eq!(best.max_degree_of_parallelism, 20);
        settings.validate().expect("defaults are valid");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings = Settings::from_json_str(
            r#"{
                "news_api": { "base_url": "http://localhost:9000/v0/", "bulkhead": { "enabled": false } },
                "best_stories": { "cache_ttl_mins": 1 }
            }"#,
        )
        .expect("valid settings");

        assert_eq!(settings.news_api.base_url, "http://localhost:9000/v0/");
        assert!(!settings.news_api.bulkhead.enabled);
        assert_eq!(settings.news_api.bulkhead.max_parallel, 10);
        assert_eq!(settings.best_stories.cache_ttl_mins, 1);
        assert_eq!(settings.best_stories.max_degree_of_parallelism, 20);
    }

    #[test]
    fn empty_document_is_all_defaults() {
        assert_eq!(Settings::from_json_str("{}").expect("valid"), Settings::default());
    }

    #[test]
    fn rejects_invalid_values() {
        for json in [
            r#"{ "news_api": { "timeout": { "seconds": 0 } } }"#,
            r#"{ "news_api": { "rate_limit": { "max_burst": 0 } } }"#,
            r#"{ "news_api": { "bulkhead": { "max_parallel": 0 } } }"#,
            r#"{ "news_api": { "circuit_breaker": { "failure_threshold": 0 } } }"#,
            r#"{ "news_api": { "base_url": "" } }"#,
            r#"{ "best_stories": { "max_degree_of_parallelism": 0 } }"#,
            r#"{ "best_stories": { "cache_ttl_mins": 0 } }"#,
        ] {
            assert!(matches!(Settings::from_json_str(json), Err(Error::Config(_))), "{json}");
        }
    }

    #[test]
    fn disabled_policies_skip_validation() {
        let json = r#"{ "news_api": { "timeout": { "enabled": false, "seconds": 0 } } }"#;
        assert!(Settings::from_json_str(json).is_ok());
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(Settings::from_json_str("{ nope"), Err(Error::Config(_))));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = Settings::from_path("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("here.json")));
    }
}
