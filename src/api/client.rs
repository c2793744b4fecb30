//! Signal service API client.

use crate::config::ApiConfig;
use crate::error::Result;
use crate::state::Signal;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Upper bound on signals returned by a single fetch.
pub const MAX_SIGNALS_PER_FETCH: u32 = 100;

/// Remote collaborators of the poller: license resolution and signal lookup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignalApi: Send + Sync {
    /// Resolve a license key to an Expert Advisor name, `None` if the
    /// license has no EA attached.
    async fn resolve_ea(&self, license_key: &str) -> Result<Option<String>>;

    /// Fetch signals for an EA created after `since`, in service order.
    async fn fetch_signals(&self, ea_name: &str, since: DateTime<Utc>) -> Result<Vec<Signal>>;
}

/// Builder for creating an HTTP API client.
pub struct HttpSignalApiBuilder {
    config: ApiConfig,
}

impl HttpSignalApiBuilder {
    /// Create a new builder with default config.
    pub fn new() -> Self {
        Self {
            config: ApiConfig::default(),
        }
    }

    /// Set the API configuration.
    pub fn config(mut self, config: ApiConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the API client.
    pub fn build(self) -> Result<HttpSignalApi> {
        HttpSignalApi::new(self.config)
    }
}

impl Default for HttpSignalApiBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// `SignalApi` implementation backed by the signal service's HTTP endpoints.
pub struct HttpSignalApi {
    /// Configuration.
    config: ApiConfig,
    /// HTTP client with the request timeout applied.
    http: reqwest::Client,
    /// Rate limiter state.
    rate_limiter: Arc<RwLock<RateLimiter>>,
}

impl HttpSignalApi {
    /// Create a new API client.
    pub fn new(config: ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            rate_limiter: Arc::new(RwLock::new(RateLimiter::new(config.rate_limit))),
            config,
            http,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Apply rate limiting.
    async fn rate_limit(&self) {
        let mut limiter = self.rate_limiter.write().await;
        limiter.wait().await;
    }
}

#[async_trait]
impl SignalApi for HttpSignalApi {
    async fn resolve_ea(&self, license_key: &str) -> Result<Option<String>> {
        self.rate_limit().await;

        let url = self.endpoint(&format!("api/v1/licenses/{license_key}/ea"));
        let response = self.http.get(&url).send().await?;

        // An unknown license is a resolved "no EA" outcome, not an error.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body: super::EaResolutionResponse = response.error_for_status()?.json().await?;
        Ok(body.ea_name)
    }

    async fn fetch_signals(&self, ea_name: &str, since: DateTime<Utc>) -> Result<Vec<Signal>> {
        self.rate_limit().await;

        let url = self.endpoint("api/v1/signals");
        let response = self
            .http
            .get(&url)
            .query(&[("ea", ea_name)])
            .query(&[("since", since.to_rfc3339().as_str())])
            .query(&[("limit", MAX_SIGNALS_PER_FETCH.to_string().as_str())])
            .send()
            .await?
            .error_for_status()?;

        let body: super::SignalsResponse = response.json().await?;
        body.signals
            .into_iter()
            .map(super::SignalConverter::convert_signal)
            .collect()
    }
}

/// Simple rate limiter.
struct RateLimiter {
    requests_per_second: u32,
    last_request: std::time::Instant,
    tokens: f64,
}

impl RateLimiter {
    fn new(requests_per_second: u32) -> Self {
        Self {
            requests_per_second,
            last_request: std::time::Instant::now(),
            tokens: requests_per_second as f64,
        }
    }

    async fn wait(&mut self) {
        let now = std::time::Instant::now();
        let elapsed = now.duration_since(self.last_request).as_secs_f64();

        // Replenish tokens
        self.tokens = (self.tokens + elapsed * self.requests_per_second as f64)
            .min(self.requests_per_second as f64);

        if self.tokens < 1.0 {
            // Need to wait
            let wait_time = (1.0 - self.tokens) / self.requests_per_second as f64;
            tokio::time::sleep(std::time::Duration::from_secs_f64(wait_time)).await;
            self.tokens = 1.0;
        }

        self.tokens -= 1.0;
        self.last_request = std::time::Instant::now();
    }
}
