#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Marketdata Engine - Tiered Provider Resolver
//!
//! Resolves, for a set of tradable symbols, a consistent snapshot of
//! price, implied volatility, realized volatility, and the backing return
//! series, by combining upstream sources of differing reliability and
//! schema with explicit precedence and data-quality tagging.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure value objects and computations
//!   - `record`: The per-symbol `MarketRecord` with provenance and warnings
//!   - `bars`: Daily bar series
//!   - `volatility`: Log returns and annualized realized volatility
//!
//! - **Application**: Orchestration and port definitions
//!   - `ports`: Traits for the batch metrics and historical bar sources
//!   - `resolver`: Cache partition, batch call, proxy fallback, bounded
//!     streaming backfill, merge and write-back
//!
//! - **Infrastructure**: Adapters for external systems
//!   - `auth`: OAuth token manager with single-flight refresh
//!   - `cache`: Single-file TTL cache with lazy expiry
//!   - `rest`: Batch metrics client with capped backoff retry
//!   - `stream`: dxLink-style WebSocket candle client
//!   - `telemetry`: Tracing subscriber setup
//!
//! # Data Flow
//!
//! ```text
//! caller ──► Resolver ──► TTL Cache (hits)
//!               │
//!               ├──► Batch Metrics API (one call per miss set)
//!               │
//!               └──► Streaming Feed ──► Volatility Calculator
//!                    (bounded pool, HV/returns gaps only)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use application::{
    BarProvider, MarketDataResolver, MetricsProvider, NullBarProvider, NullMetricsProvider,
    ProviderError, ResolverConfig, ResolverError, SymbolMetrics,
};
pub use config::{Credentials, EngineConfig};
pub use domain::{Bar, DataSource, DataWarning, MarketRecord};
