//! Price API Client - Concurrency-limited REST Client
//!
//! Wraps reqwest with a concurrency cap and retries on transient
//! server errors for every price backend REST call, and implements the
//! `PriceApi` port on top of it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use super::types::{CacheResponse, ConfigUpdateRequest, ConfigUpdateResponse, MarketResponse};
use crate::domain::feed_config::FeedConfig;
use crate::domain::snapshot::{PriceObservation, Symbol};
use crate::ports::price_api::{PriceApi, ServerFeedConfig};

/// Configuration for the price API client.
#[derive(Debug, Clone)]
pub struct PriceApiClientConfig {
  /// REST root, e.g. `http://localhost:8000/api`.
  pub base_url: String,
  /// Request timeout.
  pub timeout: Duration,
  /// Maximum concurrent requests.
  pub max_concurrent: usize,
  /// Maximum retries on server errors.
  pub max_retries: u32,
  /// Base delay between retries (exponential backoff).
  pub retry_base_delay: Duration,
}

impl Default for PriceApiClientConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8000/api".to_string(),
      timeout: Duration::from_secs(5),
      max_concurrent: 8,
      max_retries: 1,
      retry_base_delay: Duration::from_millis(200),
    }
  }
}

/// HTTP client for the price backend.
pub struct PriceApiClient {
  /// Underlying HTTP client.
  http: Client,
  /// Client configuration.
  config: PriceApiClientConfig,
  /// Concurrency limiter.
  semaphore: Arc<Semaphore>,
}

impl PriceApiClient {
  pub fn new(config: PriceApiClientConfig) -> Result<Self> {
    let http = Client::builder()
      .timeout(config.timeout)
      .pool_max_idle_per_host(4)
      .build()
      .context("Failed to build HTTP client")?;

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));

    Ok(Self {
      http,
      config,
      semaphore,
    })
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
  }

  /// GET `path` and decode the JSON body.
  async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
    let request = self.http.get(self.url(path));
    let response = self.execute_with_retry(request, path).await?;
    response
      .json::<T>()
      .await
      .with_context(|| format!("Failed to decode response from {path}"))
  }

  /// Execute a request under the concurrency cap, retrying server errors.
  async fn execute_with_retry(&self, request: RequestBuilder, path: &str) -> Result<Response> {
    let _permit = self
      .semaphore
      .acquire()
      .await
      .context("Semaphore closed")?;

    let mut last_error = None;

    for attempt in 0..=self.config.max_retries {
      if attempt > 0 {
        let delay = self.config.retry_base_delay * 2u32.pow(attempt - 1);
        debug!(attempt, delay_ms = delay.as_millis(), path, "Retrying request");
        sleep(delay).await;
      }

      let req = request
        .try_clone()
        .context("Failed to clone request")?;

      match req.send().await {
        Ok(response) => match response.status() {
          StatusCode::OK | StatusCode::CREATED => return Ok(response),
          status if status.is_server_error() => {
            warn!(status = %status, path, "Server error, retrying");
            last_error = Some(anyhow::anyhow!("Server error: {status}"));
          }
          status => {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("API error {status} on {path}: {body}"));
          }
        },
        Err(e) => {
          debug!(error = %e, attempt, path, "Request failed");
          last_error = Some(e.into());
        }
      }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Max retries exceeded")))
  }
}

#[async_trait]
impl PriceApi for PriceApiClient {
  #[instrument(skip_all, fields(symbol = %symbol))]
  async fn cached_price(&self, symbol: &Symbol) -> Result<Option<PriceObservation>> {
    let resp: CacheResponse = self
      .get_json(&format!("/cache/prices/{}", symbol.as_str()))
      .await?;
    if let Some(error) = resp.error.as_deref() {
      debug!(error, "Cache miss");
    }
    Ok(resp.into_observation())
  }

  #[instrument(skip_all, fields(symbol = %symbol))]
  async fn market_price(&self, symbol: &Symbol) -> Result<Option<PriceObservation>> {
    let resp: MarketResponse = self
      .get_json(&format!("/market/{}", symbol.as_str()))
      .await?;
    if let Some(warning) = resp.warning.as_deref() {
      warn!(warning, "Market endpoint returned placeholder data");
    }
    Ok(resp.into_observation())
  }

  async fn server_config(&self) -> Result<ServerFeedConfig> {
    self.get_json("/config").await
  }

  async fn update_server_config(&self, config: &FeedConfig) -> Result<()> {
    let body = serde_json::to_string(&ConfigUpdateRequest::from(config))
      .context("Failed to serialize config update")?;
    let request = self
      .http
      .post(self.url("/config"))
      .header("Content-Type", "application/json")
      .body(body);

    let resp: ConfigUpdateResponse = self
      .execute_with_retry(request, "/config")
      .await?
      .json()
      .await
      .context("Failed to decode config update response")?;

    if !resp.success {
      anyhow::bail!(
        "Server rejected config update: {}",
        resp.message.unwrap_or_default()
      );
    }
    debug!(message = ?resp.message, "Server config updated");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_url_joins_without_double_slash() {
    let client = PriceApiClient::new(PriceApiClientConfig {
      base_url: "http://localhost:8000/api/".to_string(),
      ..Default::default()
    })
    .unwrap();
    assert_eq!(client.url("/cache/prices/BTC"), "http://localhost:8000/api/cache/prices/BTC");
  }

  #[tokio::test]
  async fn test_unreachable_server_is_an_error() {
    let client = PriceApiClient::new(PriceApiClientConfig {
      base_url: "http://127.0.0.1:9".to_string(),
      timeout: Duration::from_millis(500),
      max_retries: 0,
      ..Default::default()
    })
    .unwrap();
    assert!(client.cached_price(&Symbol::new("BTC")).await.is_err());
  }
}
