//! Candle Bars
//!
//! One period's open/high/low/close/volume, plus the defensive
//! finalization a bar series must pass through before any volatility
//! computation: strictly increasing timestamps, no duplicates.

use serde::{Deserialize, Serialize};

/// One OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Instrument symbol.
    pub symbol: String,
    /// Period start, epoch milliseconds.
    pub time: i64,
    /// Opening price.
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Closing price.
    pub close: f64,
    /// Traded volume.
    pub volume: f64,
}

/// Finalize a bar series for downstream use.
///
/// Sorts ascending by timestamp and drops duplicate timestamps, keeping
/// the first occurrence. Streaming feeds can replay or interleave events,
/// so callers must not assume their collected series is already ordered.
#[must_use]
pub fn finalize_series(mut bars: Vec<Bar>) -> Vec<Bar> {
    bars.sort_by_key(|bar| bar.time);
    bars.dedup_by_key(|bar| bar.time);
    bars
}
