//! Batch Metrics Client
//!
//! Client for the broker's market-metrics endpoint: one HTTP GET with a
//! comma-joined symbol list and a bearer token, answered with
//! `{"data": {"items": [...]}}` where each item uses the broker's
//! hyphenated field names.
//!
//! Numeric fields arrive as JSON numbers or as decimal strings depending on
//! the broker's mood; both are accepted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::application::ports::{MetricsProvider, ProviderError, SymbolMetrics};
use crate::infrastructure::auth::{AuthError, TokenManager};

use super::retry::{ExponentialBackoffCalculator, RestRetryPolicy, is_retryable_status};

/// Per-request timeout for the metrics endpoint.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Wire Format
// =============================================================================

#[derive(Debug, Deserialize)]
struct MetricsResponse {
    data: MetricsData,
}

#[derive(Debug, Deserialize)]
struct MetricsData {
    #[serde(default)]
    items: Vec<MetricsItem>,
}

/// One item of the market-metrics response, in broker field names.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct MetricsItem {
    symbol: String,
    #[serde(default, deserialize_with = "flexible_f64")]
    last_price: Option<f64>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "flexible_f64")]
    implied_volatility_index: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64")]
    implied_volatility_index_rank: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64")]
    implied_volatility_percentile: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64")]
    historical_volatility_30_day: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64")]
    historical_volatility_90_day: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64")]
    historical_volatility_one_year: Option<f64>,
}

impl From<MetricsItem> for SymbolMetrics {
    fn from(item: MetricsItem) -> Self {
        Self {
            symbol: item.symbol,
            price: item.last_price,
            updated_at: item.updated_at,
            implied_volatility: item.implied_volatility_index,
            iv_rank: item.implied_volatility_index_rank,
            iv_percentile: item.implied_volatility_percentile,
            hv30: item.historical_volatility_30_day,
            hv90: item.historical_volatility_90_day,
            hv252: item.historical_volatility_one_year,
        }
    }
}

/// Accept a numeric field encoded as a JSON number, a decimal string, or
/// null. Unparseable strings become `None` rather than failing the whole
/// response.
fn flexible_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        Text(String),
    }

    Ok(match Option::<NumberOrString>::deserialize(deserializer)? {
        Some(NumberOrString::Number(n)) => Some(n),
        Some(NumberOrString::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

// =============================================================================
// Client
// =============================================================================

/// Batch metrics API client with bounded retry.
pub struct MetricsApiClient {
    http: reqwest::Client,
    metrics_url: String,
    tokens: Arc<TokenManager>,
    retry: RestRetryPolicy,
}

impl MetricsApiClient {
    /// Create a client for the given API base URL.
    #[must_use]
    pub fn new(http: reqwest::Client, api_base_url: &str, tokens: Arc<TokenManager>) -> Self {
        Self {
            http,
            metrics_url: format!("{}/market-metrics", api_base_url.trim_end_matches('/')),
            tokens,
            retry: RestRetryPolicy::default(),
        }
    }

    /// Override the default retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RestRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// One GET round trip; the caller decides whether to retry.
    async fn fetch_once(&self, symbols: &str) -> Result<Vec<SymbolMetrics>, FetchFailure> {
        let token = self
            .tokens
            .get_valid_token()
            .await
            .map_err(FetchFailure::Auth)?;

        let response = self
            .http
            .get(&self.metrics_url)
            .query(&[("symbols", symbols)])
            .bearer_auth(token.access_token())
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    FetchFailure::Transient(format!("metrics request failed: {e}"))
                } else {
                    FetchFailure::Permanent(ProviderError::Connection(e.to_string()))
                }
            })?;

        let status = response.status().as_u16();
        match status {
            200..=299 => {}
            401 | 403 => {
                return Err(FetchFailure::Permanent(ProviderError::Authentication(
                    format!("metrics endpoint returned HTTP {status}"),
                )));
            }
            s if is_retryable_status(s) => {
                return Err(FetchFailure::Transient(format!(
                    "metrics endpoint returned HTTP {s}"
                )));
            }
            s => {
                return Err(FetchFailure::Permanent(ProviderError::Unavailable(
                    format!("metrics endpoint returned HTTP {s}"),
                )));
            }
        }

        let body: MetricsResponse = response
            .json()
            .await
            .map_err(|e| FetchFailure::Permanent(ProviderError::Decode(e.to_string())))?;

        Ok(body.data.items.into_iter().map(Into::into).collect())
    }
}

/// Internal split between failures worth another attempt and final ones.
enum FetchFailure {
    Auth(AuthError),
    Transient(String),
    Permanent(ProviderError),
}

#[async_trait]
impl MetricsProvider for MetricsApiClient {
    async fn market_metrics(&self, symbols: &[String]) -> Result<Vec<SymbolMetrics>, ProviderError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let joined = symbols.join(",");
        let mut backoff = ExponentialBackoffCalculator::new(&self.retry);

        loop {
            match self.fetch_once(&joined).await {
                Ok(items) => {
                    tracing::debug!(
                        requested = symbols.len(),
                        returned = items.len(),
                        "batch metrics fetched"
                    );
                    return Ok(items);
                }
                Err(FetchFailure::Auth(e)) => {
                    return Err(ProviderError::Authentication(e.to_string()));
                }
                Err(FetchFailure::Permanent(e)) => return Err(e),
                Err(FetchFailure::Transient(reason)) => match backoff.next_backoff() {
                    Some(delay) => {
                        tracing::warn!(
                            %reason,
                            attempt = backoff.current_attempt(),
                            delay_ms = delay.as_millis(),
                            "retrying batch metrics call"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        return Err(ProviderError::Connection(format!(
                            "retry budget exhausted: {reason}"
                        )));
                    }
                },
            }
        }
    }
}

impl std::fmt::Debug for MetricsApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsApiClient")
            .field("metrics_url", &self.metrics_url)
            .finish_non_exhaustive()
    }
}
