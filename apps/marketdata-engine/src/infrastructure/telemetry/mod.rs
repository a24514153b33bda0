//! Telemetry Initialization
//!
//! Structured logging via `tracing`, filtered by `RUST_LOG` with a sane
//! default. Output goes to stderr so stdout stays clean for record output.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Honors `RUST_LOG`; defaults to `info` for this crate and `warn` for
/// dependencies. Calling twice is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,marketdata_engine=info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}
