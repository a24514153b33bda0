//! Market Record
//!
//! The per-symbol snapshot returned to callers: price, implied volatility,
//! realized volatility windows, and the return series used to compute them,
//! together with provenance and data-quality signaling.
//!
//! All volatility figures are stored in percent units (25.0 means 25%).
//! Upstream sources that deliver decimal fractions are normalized exactly
//! once, at ingestion, via [`normalize_vol_percent`].

use serde::{Deserialize, Serialize};

// =============================================================================
// Provenance and Quality
// =============================================================================

/// Which upstream source ultimately satisfied a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Fully satisfied by the batch metrics endpoint.
    #[default]
    Rest,
    /// Realized-volatility fields were backfilled from the streaming feed.
    Stream,
    /// Served by a legacy fallback provider.
    Legacy,
    /// Served entirely from the TTL cache.
    Cache,
}

/// Data-quality warning attached to a record.
///
/// Absent when the record is fully resolved and trustworthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataWarning {
    /// The price is older than the staleness threshold.
    StalePrice,
    /// A volatility figure arrived as a decimal fraction and was scaled to
    /// percent units.
    ScaleCorrected,
    /// Data for a different instrument substitutes for this symbol.
    ProxyUsed,
    /// Every source failed; no numeric fields are present.
    FetchError,
}

// =============================================================================
// Market Record
// =============================================================================

/// Per-symbol market-data snapshot.
///
/// Invariant: when `warning` is [`DataWarning::FetchError`] all numeric
/// fields are `None`; otherwise `price` is present whenever `is_stale` is
/// meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRecord {
    /// Symbol this record describes (equity, ETF, or futures root).
    pub symbol: String,
    /// Last known price.
    pub price: Option<f64>,
    /// Whether the price is older than the staleness threshold.
    pub is_stale: bool,
    /// Implied volatility, percent units.
    pub implied_volatility: Option<f64>,
    /// Implied volatility rank, percent units.
    pub iv_rank: Option<f64>,
    /// Implied volatility percentile, percent units.
    pub iv_percentile: Option<f64>,
    /// Realized volatility over a trailing 30-bar window, percent units.
    pub hv30: Option<f64>,
    /// Realized volatility over a trailing 90-bar window, percent units.
    pub hv90: Option<f64>,
    /// Realized volatility over a trailing 252-bar window, percent units.
    pub hv252: Option<f64>,
    /// Chronological log-return series backing the realized-volatility
    /// figures.
    pub return_series: Option<Vec<f64>>,
    /// Which source satisfied this record.
    pub data_source: DataSource,
    /// Data-quality warning, if any.
    pub warning: Option<DataWarning>,
    /// Instrument whose data substitutes for this symbol, when proxied.
    pub proxy_symbol: Option<String>,
}

impl MarketRecord {
    /// Create an empty record for `symbol` with no data attached.
    #[must_use]
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            price: None,
            is_stale: false,
            implied_volatility: None,
            iv_rank: None,
            iv_percentile: None,
            hv30: None,
            hv90: None,
            hv252: None,
            return_series: None,
            data_source: DataSource::Rest,
            warning: None,
            proxy_symbol: None,
        }
    }

    /// Create the record returned when every source failed for a symbol.
    ///
    /// Carries [`DataWarning::FetchError`] and no numeric fields, per the
    /// error-handling contract: failed symbols are reported, never dropped.
    #[must_use]
    pub fn fetch_error(symbol: impl Into<String>) -> Self {
        Self {
            warning: Some(DataWarning::FetchError),
            ..Self::empty(symbol)
        }
    }

    /// Whether any realized-volatility field is still missing.
    #[must_use]
    pub const fn missing_hv(&self) -> bool {
        self.hv30.is_none() || self.hv90.is_none() || self.return_series.is_none()
    }

    /// Whether the record carries no numeric data at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.price.is_none()
            && self.implied_volatility.is_none()
            && self.hv30.is_none()
            && self.hv90.is_none()
            && self.hv252.is_none()
            && self.return_series.is_none()
    }

    /// Attach a warning, keeping the first one already present.
    ///
    /// The earliest warning wins: a record that was proxied and later
    /// scale-corrected reports the proxy.
    pub fn add_warning(&mut self, warning: DataWarning) {
        if self.warning.is_none() {
            self.warning = Some(warning);
        }
    }
}

// =============================================================================
// Unit Normalization
// =============================================================================

/// Upper bound below which a volatility value is treated as a decimal
/// fraction rather than a percentage.
///
/// No liquid instrument trades at 2% annualized volatility, and decimal
/// inputs above 2.0 (200%) do not occur in practice, so the ranges are
/// disjoint at this boundary.
pub const DECIMAL_FRACTION_CEILING: f64 = 2.0;

/// Normalize a volatility value to percent units.
///
/// Positive values at or below [`DECIMAL_FRACTION_CEILING`] are
/// interpreted as decimal fractions and multiplied by 100. Returns the
/// normalized value and whether a correction was applied. Zero and
/// negative values pass through unchanged and uncorrected; there is
/// nothing meaningful to scale.
///
/// Must be applied exactly once, at ingestion. Re-applying it to an
/// already-percent value below the ceiling would corrupt the data.
#[must_use]
pub fn normalize_vol_percent(value: f64) -> (f64, bool) {
    if value > 0.0 && value <= DECIMAL_FRACTION_CEILING {
        (value * 100.0, true)
    } else {
        (value, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0.25, 25.0, true; "decimal fraction scaled")]
    #[test_case(25.0, 25.0, false; "percent value unchanged")]
    #[test_case(2.0, 200.0, true; "boundary value scaled")]
    #[test_case(2.1, 2.1, false; "just above boundary unchanged")]
    #[test_case(0.0, 0.0, false; "zero passes through uncorrected")]
    #[test_case(-0.5, -0.5, false; "negative passes through uncorrected")]
    fn normalization(input: f64, expected: f64, corrected: bool) {
        let (value, was_corrected) = normalize_vol_percent(input);
        assert!((value - expected).abs() < f64::EPSILON);
        assert_eq!(was_corrected, corrected);
    }

    #[test]
    fn fetch_error_record_has_no_numeric_fields() {
        let record = MarketRecord::fetch_error("XYZ");
        assert!(record.is_empty());
        assert_eq!(record.warning, Some(DataWarning::FetchError));
        assert_eq!(record.symbol, "XYZ");
    }

    #[test]
    fn first_warning_wins() {
        let mut record = MarketRecord::empty("AAPL");
        record.add_warning(DataWarning::ProxyUsed);
        record.add_warning(DataWarning::ScaleCorrected);
        assert_eq!(record.warning, Some(DataWarning::ProxyUsed));
    }

    #[test]
    fn missing_hv_tracks_backfill_need() {
        let mut record = MarketRecord::empty("AAPL");
        assert!(record.missing_hv());

        record.hv30 = Some(20.0);
        record.hv90 = Some(22.0);
        assert!(record.missing_hv()); // return series still absent

        record.return_series = Some(vec![0.01, -0.02]);
        assert!(!record.missing_hv());
    }

    #[test]
    fn data_source_serializes_lowercase() {
        let json = serde_json::to_string(&DataSource::Stream).unwrap();
        assert_eq!(json, r#""stream""#);
    }
}
