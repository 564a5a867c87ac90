use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::FetchError;
use crate::models::{DataSource, PipelineStatus};
use crate::services::ResponseCache;

/// Identity of one outbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub url: String,
    pub method: String,
    pub body: Option<Value>,
    /// Whether the pipeline may serve and store this call in its memory tier.
    pub cacheable: bool,
}

impl RequestDescriptor {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            body: None,
            cacheable: true,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            method: "POST".to_string(),
            body: Some(body),
            cacheable: true,
        }
    }

    pub fn uncached(mut self) -> Self {
        self.cacheable = false;
        self
    }

    /// Canonical cache key: the resolved URL, plus method and body for
    /// anything other than a plain GET.
    pub fn cache_key(&self) -> String {
        match (&self.body, self.method.as_str()) {
            (None, "GET") => self.url.clone(),
            (None, method) => format!("{} {}", method, self.url),
            (Some(body), method) => format!("{} {} {}", method, self.url, body),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Failure before any response arrived (connect, DNS, reset).
#[derive(Debug, Clone)]
pub struct TransportError(pub String);

/// Sends one request and hands back the raw status and body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestDescriptor) -> Result<TransportResponse, TransportError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<TransportResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| TransportError(format!("invalid method {}: {}", request.method, e)))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json");
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError(e.to_string()))?;

        Ok(TransportResponse { status, body })
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub name: String,
    /// Minimum spacing between two dispatches.
    pub min_interval: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: u64,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            min_interval: Duration::from_millis(1200),
            cache_ttl: Duration::from_secs(60),
            cache_capacity: 1000,
            request_timeout: Duration::from_secs(10),
            max_retries: 3,
            initial_backoff: Duration::from_millis(1000),
        }
    }
}

#[derive(Default)]
struct RateLimitState {
    last_dispatch: Option<Instant>,
    last_dispatch_wall: Option<DateTime<Utc>>,
}

/// Outbound call wrapper: memory cache, rate limiting, timeout and
/// retry with exponential backoff. One instance per gateway.
pub struct RequestPipeline {
    config: PipelineConfig,
    transport: Arc<dyn Transport>,
    cache: Arc<ResponseCache>,
    rate_limit: Mutex<RateLimitState>,
    request_count: AtomicU64,
}

impl RequestPipeline {
    pub fn new(config: PipelineConfig, transport: Arc<dyn Transport>) -> Self {
        let cache = Arc::new(ResponseCache::new(config.cache_capacity, config.cache_ttl));
        Self {
            config,
            transport,
            cache,
            rate_limit: Mutex::new(RateLimitState::default()),
            request_count: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub async fn execute(
        &self,
        descriptor: &RequestDescriptor,
        max_retries: u32,
        initial_backoff: Duration,
    ) -> Result<Value, FetchError> {
        self.execute_sourced(descriptor, max_retries, initial_backoff)
            .await
            .map(|(payload, _)| payload)
    }

    /// Like `execute`, also reporting whether the memory tier answered.
    pub async fn execute_sourced(
        &self,
        descriptor: &RequestDescriptor,
        max_retries: u32,
        initial_backoff: Duration,
    ) -> Result<(Value, DataSource), FetchError> {
        self.execute_parsed(descriptor, max_retries, initial_backoff, Ok::<Value, FetchError>)
            .await
    }

    /// Runs `descriptor` and hands the payload to `parse`. Only payloads that
    /// `parse` accepts are stored in the memory tier.
    pub async fn execute_parsed<T, F>(
        &self,
        descriptor: &RequestDescriptor,
        max_retries: u32,
        initial_backoff: Duration,
        parse: F,
    ) -> Result<(T, DataSource), FetchError>
    where
        F: Fn(Value) -> Result<T, FetchError>,
    {
        let cache_key = descriptor.cache_key();
        // Cache hits skip the rate limiter; only dispatches take a slot.
        if descriptor.cacheable {
            if let Some(payload) = self.cache.get(&cache_key).await {
                tracing::debug!("Cache hit for: {}", descriptor.url);
                return Ok((parse(payload)?, DataSource::MemoryCache));
            }
        }

        let mut retries_left = max_retries;
        let mut backoff = initial_backoff;

        loop {
            self.wait_for_slot().await;

            match self.dispatch(descriptor).await {
                Ok(payload) => {
                    let value = match parse(payload.clone()) {
                        Ok(value) => value,
                        Err(err) => {
                            tracing::error!(
                                "[{}] {} returned an unexpected shape: {}",
                                self.config.name,
                                descriptor.url,
                                err
                            );
                            return Err(err);
                        }
                    };
                    if descriptor.cacheable {
                        self.cache.insert(&cache_key, payload).await;
                    }
                    return Ok((value, DataSource::Live));
                }
                Err(err) if err.is_retryable() && retries_left > 0 => {
                    tracing::warn!(
                        "[{}] {} failed: {}, retrying in {}ms ({} attempts left)",
                        self.config.name,
                        descriptor.url,
                        err,
                        backoff.as_millis(),
                        retries_left
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    retries_left -= 1;
                }
                Err(err) => {
                    tracing::error!("[{}] {} failed: {}", self.config.name, descriptor.url, err);
                    return Err(err);
                }
            }
        }
    }

    /// Executes and parses the payload into `T`.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<(T, DataSource), FetchError> {
        self.execute_parsed(
            descriptor,
            self.config.max_retries,
            self.config.initial_backoff,
            |payload| {
                serde_json::from_value(payload)
                    .map_err(|e| FetchError::InvalidResponse(format!("{}: {}", descriptor.url, e)))
            },
        )
        .await
    }

    /// Suspends until `min_interval` has passed since the previous dispatch,
    /// then records this dispatch. Check and update happen under one lock, so
    /// concurrent callers are spaced as well.
    async fn wait_for_slot(&self) {
        let mut state = self.rate_limit.lock().await;
        if let Some(last) = state.last_dispatch {
            let elapsed = last.elapsed();
            if elapsed < self.config.min_interval {
                tokio::time::sleep(self.config.min_interval - elapsed).await;
            }
        }
        state.last_dispatch = Some(Instant::now());
        state.last_dispatch_wall = Some(Utc::now());
    }

    async fn dispatch(&self, descriptor: &RequestDescriptor) -> Result<Value, FetchError> {
        let count = self.request_count.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!("[{}] Request #{}: {}", self.config.name, count, descriptor.url);

        let response = tokio::time::timeout(
            self.config.request_timeout,
            self.transport.send(descriptor),
        )
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(|e| FetchError::transport(e.0))?;

        if response.status == 429 {
            tracing::warn!("[{}] Rate limited by upstream", self.config.name);
            return Err(FetchError::RateLimited);
        }
        if !(200..300).contains(&response.status) {
            return Err(FetchError::Network {
                status: Some(response.status),
                message: truncate(&response.body, 200),
            });
        }

        serde_json::from_str(&response.body)
            .map_err(|e| FetchError::InvalidResponse(format!("{}: {}", descriptor.url, e)))
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        tracing::info!("[{}] Request cache cleared", self.config.name);
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> PipelineStatus {
        let last_request_at = self.rate_limit.lock().await.last_dispatch_wall;
        PipelineStatus {
            name: self.config.name.clone(),
            request_count: self.request_count(),
            cache_size: self.cache.entry_count().await,
            last_request_at,
            rate_limit_interval_ms: self.config.min_interval.as_millis() as u64,
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
