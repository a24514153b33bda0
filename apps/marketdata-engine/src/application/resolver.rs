//! Provider Resolver
//!
//! Orchestrates the tiered sources into one consistent snapshot per symbol:
//!
//! 1. Partition the request into cache hits and misses.
//! 2. One batch metrics call for the whole miss set.
//! 3. Proxy-instrument fallback for roots the batch endpoint cannot cover.
//! 4. Bounded-parallel streaming backfill for symbols still lacking
//!    realized-volatility or return-series fields.
//! 5. Merge with explicit precedence, tag provenance and quality, write
//!    back to cache with per-field TTLs.
//!
//! The stages form a tagged-result pipeline: each stage only attempts the
//! fields the previous stages left missing. Batch fields always win;
//! streaming-derived fields fill gaps only; price and implied volatility
//! never come from the streaming path.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::{CacheSettings, FetchSettings};
use crate::domain::{
    Bar, DataSource, DataWarning, MarketRecord, log_returns, normalize_vol_percent,
    realized_volatility,
};
use crate::infrastructure::cache::TtlCache;

use super::ports::{BarProvider, MetricsProvider, ProviderError, SymbolMetrics};

/// Realized-volatility windows backfilled from the streaming path.
const HV_WINDOWS: [usize; 3] = [30, 90, 252];

// =============================================================================
// Errors and Configuration
// =============================================================================

/// Fatal resolver failures. Per-symbol problems never surface here; they
/// become warnings on the affected records instead.
#[derive(Debug, Error)]
pub enum ResolverError {
    /// Credentials were rejected somewhere in the source chain.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The batch metrics call exhausted its retry budget.
    #[error("batch metrics unavailable: {0}")]
    BatchUnavailable(String),
}

/// Resolver tuning knobs.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Maximum concurrent streaming backfill fetches.
    pub parallelism: usize,
    /// Price age beyond which a record is flagged stale.
    pub stale_after: Duration,
    /// Calendar-day lookback for daily-bar fetches.
    pub lookback_days: u32,
    /// Cache TTL for price entries.
    pub price_ttl: Duration,
    /// Cache TTL for implied-volatility entries.
    pub iv_ttl: Duration,
    /// Cache TTL for realized-volatility entries.
    pub hv_ttl: Duration,
    /// Proxy instruments for roots the batch endpoint has no data for.
    pub proxies: HashMap<String, String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        let fetch = FetchSettings::default();
        let cache = CacheSettings::default();
        Self {
            parallelism: fetch.parallelism,
            stale_after: fetch.stale_after,
            lookback_days: fetch.lookback_days,
            price_ttl: cache.price_ttl,
            iv_ttl: cache.iv_ttl,
            hv_ttl: cache.hv_ttl,
            proxies: default_proxy_map(),
        }
    }
}

impl ResolverConfig {
    /// Build a resolver configuration from loaded settings.
    #[must_use]
    pub fn from_settings(fetch: &FetchSettings, cache: &CacheSettings) -> Self {
        Self {
            parallelism: fetch.parallelism,
            stale_after: fetch.stale_after,
            lookback_days: fetch.lookback_days,
            price_ttl: cache.price_ttl,
            iv_ttl: cache.iv_ttl,
            hv_ttl: cache.hv_ttl,
            proxies: default_proxy_map(),
        }
    }
}

/// Liquid ETF proxies for the futures roots the batch endpoint cannot
/// quote directly.
#[must_use]
pub fn default_proxy_map() -> HashMap<String, String> {
    [
        ("/ES", "SPY"),
        ("/NQ", "QQQ"),
        ("/YM", "DIA"),
        ("/RTY", "IWM"),
        ("/CL", "USO"),
        ("/GC", "GLD"),
    ]
    .into_iter()
    .map(|(root, proxy)| (root.to_string(), proxy.to_string()))
    .collect()
}

// =============================================================================
// Cache Payloads
// =============================================================================

// Each field family is cached under its own key with its own TTL; a symbol
// counts as a cache hit only when all three families are present and
// unexpired.

#[derive(Debug, Serialize, Deserialize)]
struct CachedPrice {
    price: f64,
    is_stale: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedIv {
    implied_volatility: f64,
    iv_rank: Option<f64>,
    iv_percentile: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedHv {
    hv30: f64,
    hv90: f64,
    hv252: Option<f64>,
    return_series: Vec<f64>,
    proxy_symbol: Option<String>,
}

fn price_key(symbol: &str) -> String {
    format!("price_{symbol}")
}

fn iv_key(symbol: &str) -> String {
    format!("iv_{symbol}")
}

fn hv_key(symbol: &str) -> String {
    format!("hv_{symbol}")
}

// =============================================================================
// Resolver
// =============================================================================

/// Tiered market-data resolver.
pub struct MarketDataResolver {
    metrics: Arc<dyn MetricsProvider>,
    bars: Arc<dyn BarProvider>,
    cache: Option<Arc<TtlCache>>,
    config: ResolverConfig,
    backfill_permits: Arc<Semaphore>,
}

impl MarketDataResolver {
    /// Compose a resolver from its sources. Pass `None` for the cache to
    /// run without one.
    #[must_use]
    pub fn new(
        metrics: Arc<dyn MetricsProvider>,
        bars: Arc<dyn BarProvider>,
        cache: Option<Arc<TtlCache>>,
        config: ResolverConfig,
    ) -> Self {
        let permits = config.parallelism.max(1);
        Self {
            metrics,
            bars,
            cache,
            config,
            backfill_permits: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Resolve a snapshot for every requested symbol.
    ///
    /// Every symbol appears in the result; symbols that fail entirely carry
    /// a `fetch_error` warning and no numeric fields.
    ///
    /// # Errors
    ///
    /// Only credential rejections and an exhausted batch retry budget are
    /// fatal; everything else degrades per symbol.
    pub async fn get_market_data(
        &self,
        symbols: &[String],
    ) -> Result<BTreeMap<String, MarketRecord>, ResolverError> {
        let mut records: BTreeMap<String, MarketRecord> = BTreeMap::new();
        let mut misses: Vec<String> = Vec::new();

        for symbol in symbols {
            if records.contains_key(symbol) {
                continue;
            }
            match self.from_cache(symbol).await {
                Some(record) => {
                    records.insert(symbol.clone(), record);
                }
                None => {
                    misses.push(symbol.clone());
                    records.insert(symbol.clone(), MarketRecord::empty(symbol.clone()));
                }
            }
        }

        tracing::debug!(
            requested = symbols.len(),
            hits = records.len() - misses.len(),
            misses = misses.len(),
            "cache partition"
        );

        if misses.is_empty() {
            return Ok(records);
        }

        self.ingest_batch(&mut records, &misses).await?;
        self.resolve_proxies(&mut records, &misses).await?;
        self.backfill_from_stream(&mut records, &misses).await?;

        for symbol in &misses {
            let Some(record) = records.get_mut(symbol) else {
                continue;
            };
            if record.is_empty() {
                tracing::warn!(symbol, "every source failed; returning fetch_error record");
                *record = MarketRecord::fetch_error(symbol.clone());
            } else {
                self.write_back(record).await;
            }
        }

        Ok(records)
    }

    /// One batch call for the whole miss set, folded into the records.
    async fn ingest_batch(
        &self,
        records: &mut BTreeMap<String, MarketRecord>,
        misses: &[String],
    ) -> Result<(), ResolverError> {
        let items = self.call_batch(misses).await?;

        for item in items {
            if let Some(record) = records.get_mut(&item.symbol) {
                self.ingest_metrics(record, &item);
            }
        }
        Ok(())
    }

    /// Second-chance batch call through the proxy map for miss symbols the
    /// first call left completely empty.
    async fn resolve_proxies(
        &self,
        records: &mut BTreeMap<String, MarketRecord>,
        misses: &[String],
    ) -> Result<(), ResolverError> {
        // root symbol -> proxy instrument, only for still-empty records
        let wanted: HashMap<String, String> = misses
            .iter()
            .filter(|s| records.get(*s).is_some_and(MarketRecord::is_empty))
            .filter_map(|s| self.config.proxies.get(s).map(|p| (s.clone(), p.clone())))
            .collect();

        if wanted.is_empty() {
            return Ok(());
        }

        let targets: Vec<String> = wanted.values().cloned().collect();
        let items = self.call_batch(&targets).await?;
        let by_proxy: HashMap<&str, &SymbolMetrics> =
            items.iter().map(|i| (i.symbol.as_str(), i)).collect();

        for (symbol, proxy) in &wanted {
            let Some(item) = by_proxy.get(proxy.as_str()).copied() else {
                continue;
            };
            let Some(record) = records.get_mut(symbol) else {
                continue;
            };

            record.proxy_symbol = Some(proxy.clone());
            record.add_warning(DataWarning::ProxyUsed);
            self.ingest_metrics(record, item);
            tracing::info!(symbol, proxy, "resolved through proxy instrument");
        }
        Ok(())
    }

    async fn call_batch(&self, symbols: &[String]) -> Result<Vec<SymbolMetrics>, ResolverError> {
        match self.metrics.market_metrics(symbols).await {
            Ok(items) => Ok(items),
            Err(ProviderError::Authentication(reason)) => {
                Err(ResolverError::Authentication(reason))
            }
            Err(ProviderError::Connection(reason)) => {
                Err(ResolverError::BatchUnavailable(reason))
            }
            // A decodable-but-useless answer degrades to "no items"; the
            // streaming path still gets its chance.
            Err(e @ (ProviderError::Decode(_) | ProviderError::Unavailable(_))) => {
                tracing::warn!(error = %e, "batch metrics call yielded nothing usable");
                Ok(Vec::new())
            }
        }
    }

    /// Fold one batch item into a record, normalizing units and evaluating
    /// staleness. This is the single place volatility units are normalized.
    fn ingest_metrics(&self, record: &mut MarketRecord, item: &SymbolMetrics) {
        let mut corrected = false;
        let mut normalize = |value: Option<f64>| {
            value.map(|v| {
                let (normalized, was_corrected) = normalize_vol_percent(v);
                corrected |= was_corrected;
                normalized
            })
        };

        record.implied_volatility = normalize(item.implied_volatility);
        record.hv30 = normalize(item.hv30);
        record.hv90 = normalize(item.hv90);
        record.hv252 = normalize(item.hv252);

        // Rank and percentile are defined by the endpoint as fractions of
        // 1; scale unconditionally, no correction warning.
        record.iv_rank = item.iv_rank.map(|v| v * 100.0);
        record.iv_percentile = item.iv_percentile.map(|v| v * 100.0);

        record.price = item.price;
        if record.price.is_some() {
            record.is_stale = item
                .updated_at
                .is_some_and(|t| (Utc::now() - t).num_seconds() > self.config.stale_after.as_secs() as i64);
            if record.is_stale {
                record.add_warning(DataWarning::StalePrice);
            }
        }

        if corrected {
            record.add_warning(DataWarning::ScaleCorrected);
        }
    }

    /// Streaming backfill for records still missing realized-volatility or
    /// return-series fields, bounded by the configured parallelism.
    async fn backfill_from_stream(
        &self,
        records: &mut BTreeMap<String, MarketRecord>,
        misses: &[String],
    ) -> Result<(), ResolverError> {
        let targets: Vec<(String, String)> = misses
            .iter()
            .filter_map(|symbol| {
                let record = records.get(symbol)?;
                if !record.missing_hv() {
                    return None;
                }
                let fetch_symbol = record
                    .proxy_symbol
                    .clone()
                    .unwrap_or_else(|| symbol.clone());
                Some((symbol.clone(), fetch_symbol))
            })
            .collect();

        if targets.is_empty() {
            return Ok(());
        }

        let fetches = targets.into_iter().map(|(symbol, fetch_symbol)| {
            let bars = Arc::clone(&self.bars);
            let permits = Arc::clone(&self.backfill_permits);
            let lookback = self.config.lookback_days;
            async move {
                let permit = permits.acquire().await;
                let result = match permit {
                    Ok(_permit) => bars.daily_bars(&fetch_symbol, lookback).await,
                    Err(_) => Err(ProviderError::Unavailable(
                        "backfill pool closed".to_string(),
                    )),
                };
                (symbol, result)
            }
        });

        for (symbol, result) in futures::future::join_all(fetches).await {
            match result {
                Ok(bars) => {
                    if let Some(record) = records.get_mut(&symbol) {
                        apply_bars(record, bars);
                    }
                }
                Err(e) if e.is_fatal() => {
                    return Err(ResolverError::Authentication(e.to_string()));
                }
                Err(e) => {
                    tracing::warn!(symbol, error = %e, "streaming backfill failed");
                }
            }
        }
        Ok(())
    }

    /// Reassemble a record from the three cache families. A hit requires
    /// all of them.
    async fn from_cache(&self, symbol: &str) -> Option<MarketRecord> {
        let cache = self.cache.as_ref()?;

        let price: CachedPrice = cache.get(&price_key(symbol)).await?;
        let iv: CachedIv = cache.get(&iv_key(symbol)).await?;
        let hv: CachedHv = cache.get(&hv_key(symbol)).await?;

        let mut record = MarketRecord {
            price: Some(price.price),
            is_stale: price.is_stale,
            implied_volatility: Some(iv.implied_volatility),
            iv_rank: iv.iv_rank,
            iv_percentile: iv.iv_percentile,
            hv30: Some(hv.hv30),
            hv90: Some(hv.hv90),
            hv252: hv.hv252,
            return_series: Some(hv.return_series),
            data_source: DataSource::Cache,
            proxy_symbol: hv.proxy_symbol,
            ..MarketRecord::empty(symbol)
        };

        if record.proxy_symbol.is_some() {
            record.add_warning(DataWarning::ProxyUsed);
        }
        if record.is_stale {
            record.add_warning(DataWarning::StalePrice);
        }
        Some(record)
    }

    /// Write each present field family back with its own TTL. Values are
    /// already normalized; a later cache hit must not re-normalize.
    async fn write_back(&self, record: &MarketRecord) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };

        if let Some(price) = record.price {
            cache
                .set(
                    &price_key(&record.symbol),
                    &CachedPrice {
                        price,
                        is_stale: record.is_stale,
                    },
                    self.config.price_ttl,
                )
                .await;
        }

        if let Some(implied_volatility) = record.implied_volatility {
            cache
                .set(
                    &iv_key(&record.symbol),
                    &CachedIv {
                        implied_volatility,
                        iv_rank: record.iv_rank,
                        iv_percentile: record.iv_percentile,
                    },
                    self.config.iv_ttl,
                )
                .await;
        }

        if let (Some(hv30), Some(hv90), Some(return_series)) =
            (record.hv30, record.hv90, record.return_series.as_ref())
        {
            cache
                .set(
                    &hv_key(&record.symbol),
                    &CachedHv {
                        hv30,
                        hv90,
                        hv252: record.hv252,
                        return_series: return_series.clone(),
                        proxy_symbol: record.proxy_symbol.clone(),
                    },
                    self.config.hv_ttl,
                )
                .await;
        }
    }
}

impl std::fmt::Debug for MarketDataResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketDataResolver")
            .field("config", &self.config)
            .field("cache_enabled", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

/// Fill gaps in a record from a daily-bar series. Fields the batch call
/// already supplied are never overwritten; the record is tagged `stream`
/// only when a volatility figure actually came from here.
///
/// The series is sorted and de-duplicated here, regardless of what the
/// bar source promised: return math on out-of-order closes is silently
/// wrong, not an error anyone would see.
fn apply_bars(record: &mut MarketRecord, bars: Vec<Bar>) {
    let bars = crate::domain::finalize_series(bars);
    if bars.is_empty() {
        return;
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let returns = log_returns(&closes);
    if returns.is_empty() {
        return;
    }

    let mut filled_hv = false;
    for window in HV_WINDOWS {
        let slot = match window {
            30 => &mut record.hv30,
            90 => &mut record.hv90,
            _ => &mut record.hv252,
        };
        if slot.is_none() {
            // Calculator output is decimal form; records carry percent.
            if let Some(vol) = realized_volatility(&closes, window) {
                *slot = Some(vol * 100.0);
                filled_hv = true;
            }
        }
    }

    if record.return_series.is_none() {
        record.return_series = Some(returns);
    }
    if filled_hv {
        record.data_source = DataSource::Stream;
    }
}
