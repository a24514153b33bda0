//! Data Source Ports (Driven Ports)
//!
//! Interfaces the resolver uses to reach upstream market-data sources.
//! Infrastructure adapters (REST client, streaming client) implement these;
//! tests substitute scripted fakes; a source that is disabled at
//! composition time is wired to its null implementation rather than checked
//! for at runtime.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Bar;

// =============================================================================
// Port Error
// =============================================================================

/// Error returned by an upstream data source.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Credentials were rejected. Fatal: stops all work needing the token.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The source could not be reached or the session died.
    #[error("connection error: {0}")]
    Connection(String),

    /// The source responded with something we could not decode.
    #[error("malformed response: {0}")]
    Decode(String),

    /// The source answered but had nothing usable for the request.
    #[error("data unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Whether this failure must abort the whole batch rather than just
    /// the symbol that triggered it.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

// =============================================================================
// Batch Metrics Port
// =============================================================================

/// Raw per-symbol metrics as delivered by the batch endpoint.
///
/// Values are in whatever units the broker uses; the resolver normalizes
/// volatility figures to percent at ingestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolMetrics {
    /// Symbol the metrics describe.
    pub symbol: String,
    /// Last known price.
    pub price: Option<f64>,
    /// When the broker last updated this entry.
    pub updated_at: Option<DateTime<Utc>>,
    /// Implied volatility index.
    pub implied_volatility: Option<f64>,
    /// Implied volatility rank.
    pub iv_rank: Option<f64>,
    /// Implied volatility percentile.
    pub iv_percentile: Option<f64>,
    /// 30-day historical volatility.
    pub hv30: Option<f64>,
    /// 90-day historical volatility.
    pub hv90: Option<f64>,
    /// One-year historical volatility.
    pub hv252: Option<f64>,
}

/// Batch metrics source: one request/response round trip for a whole
/// symbol set.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Fetch metrics for all `symbols` in a single upstream call.
    ///
    /// Symbols the source has no data for are simply absent from the
    /// result; that is not an error.
    async fn market_metrics(&self, symbols: &[String]) -> Result<Vec<SymbolMetrics>, ProviderError>;
}

// =============================================================================
// Bar Source Port
// =============================================================================

/// Historical bar source, consulted only for fields the batch provider
/// could not supply.
#[async_trait]
pub trait BarProvider: Send + Sync {
    /// Fetch up to `lookback_days` of daily bars for one symbol,
    /// chronologically ordered.
    ///
    /// An empty result means "unavailable", not an error.
    async fn daily_bars(&self, symbol: &str, lookback_days: u32) -> Result<Vec<Bar>, ProviderError>;
}

// =============================================================================
// Null Objects
// =============================================================================

/// Metrics source that is disabled: always answers with no items.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMetricsProvider;

#[async_trait]
impl MetricsProvider for NullMetricsProvider {
    async fn market_metrics(
        &self,
        _symbols: &[String],
    ) -> Result<Vec<SymbolMetrics>, ProviderError> {
        Ok(Vec::new())
    }
}

/// Bar source that is disabled: always answers with no bars.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBarProvider;

#[async_trait]
impl BarProvider for NullBarProvider {
    async fn daily_bars(
        &self,
        _symbol: &str,
        _lookback_days: u32,
    ) -> Result<Vec<Bar>, ProviderError> {
        Ok(Vec::new())
    }
}
