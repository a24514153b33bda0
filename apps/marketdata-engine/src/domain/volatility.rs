//! Realized-Volatility Calculator
//!
//! Pure computation from an ordered close series to annualized volatility:
//! log returns between consecutive closes, sample standard deviation over a
//! trailing window, scaled by √252 trading days.
//!
//! Results are in decimal form (0.18 means 18%). Unit normalization to
//! percent happens at the resolver's ingestion boundary, not here.

/// Trading days per year used for annualization.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Compute log returns between consecutive closes.
///
/// Non-positive closes cannot produce a log return; the corresponding pair
/// is skipped rather than poisoning the series.
#[must_use]
pub fn log_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|pair| pair[0] > 0.0 && pair[1] > 0.0)
        .map(|pair| (pair[1] / pair[0]).ln())
        .collect()
}

/// Annualized realized volatility over a trailing window, decimal form.
///
/// Requires at least `window + 1` usable closes (`window` returns).
/// Returns `None` when there is insufficient data; that is an expected
/// outcome for thinly traded instruments, not an error.
#[must_use]
pub fn realized_volatility(closes: &[f64], window: usize) -> Option<f64> {
    if window < 2 {
        return None;
    }

    let returns = log_returns(closes);
    if returns.len() < window {
        return None;
    }

    let trailing = &returns[returns.len() - window..];
    std_dev(trailing).map(|sd| sd * TRADING_DAYS_PER_YEAR.sqrt())
}

/// Sample standard deviation (n − 1 denominator).
fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0);

    Some(variance.sqrt())
}
