//! Batch Metrics REST Adapter
//!
//! Synchronous request/response client for the broker's market-metrics
//! endpoint, with capped exponential-backoff retry for transient failures.

mod client;
mod retry;

pub use client::MetricsApiClient;
pub use retry::{ExponentialBackoffCalculator, RestRetryPolicy};
