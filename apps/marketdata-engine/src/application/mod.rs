//! Application Layer
//!
//! Port definitions for upstream data sources and the provider resolver
//! that orchestrates them.

pub mod ports;
pub mod resolver;

pub use ports::{
    BarProvider, MetricsProvider, NullBarProvider, NullMetricsProvider, ProviderError,
    SymbolMetrics,
};
pub use resolver::{MarketDataResolver, ResolverConfig, ResolverError};
