//! Domain Layer
//!
//! Core value objects and pure computations. No I/O, no clocks other than
//! timestamps carried on the data itself.

pub mod bars;
pub mod record;
pub mod volatility;

pub use bars::{Bar, finalize_series};
pub use record::{DataSource, DataWarning, MarketRecord, normalize_vol_percent};
pub use volatility::{log_returns, realized_volatility};
