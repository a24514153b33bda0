//! Marketdata Engine Binary
//!
//! Resolves market-data snapshots for the symbols given on the command
//! line and prints one JSON record per line to stdout.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p marketdata-engine -- AAPL MSFT /ES
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `TASTY_CLIENT_ID`: OAuth client id
//! - `TASTY_CLIENT_SECRET`: OAuth client secret
//! - `TASTY_REFRESH_TOKEN`: long-lived refresh credential
//!
//! ## Optional
//! - `TASTY_API_BASE_URL`: batch metrics / token API base (default: production)
//! - `DXLINK_URL`: streaming venue WebSocket URL (default: production)
//! - `MD_CACHE_PATH`: TTL cache database file (default: marketdata-cache.db)
//! - `MD_FETCH_PARALLELISM`: concurrent streaming fetches (default: 3)
//! - `MD_STALE_AFTER_SECS`: price staleness threshold (default: 900)
//! - `RUST_LOG`: log level (default: info)

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;

use marketdata_engine::application::{MarketDataResolver, ResolverConfig};
use marketdata_engine::config::EngineConfig;
use marketdata_engine::infrastructure::auth::TokenManager;
use marketdata_engine::infrastructure::cache::TtlCache;
use marketdata_engine::infrastructure::rest::MetricsApiClient;
use marketdata_engine::infrastructure::stream::StreamBarSource;
use marketdata_engine::infrastructure::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    load_dotenv();
    telemetry::init();

    let symbols: Vec<String> = std::env::args().skip(1).collect();
    if symbols.is_empty() {
        anyhow::bail!("usage: marketdata-engine SYMBOL [SYMBOL ...]");
    }

    let config = EngineConfig::from_env().context("loading configuration")?;
    tracing::info!(
        api_base = %config.api_base_url,
        stream_url = %config.stream.url,
        parallelism = config.fetch.parallelism,
        "starting marketdata engine"
    );

    let http = reqwest::Client::new();
    let tokens = Arc::new(TokenManager::new(
        http.clone(),
        &config.api_base_url,
        config.credentials.clone(),
    ));

    let metrics = Arc::new(MetricsApiClient::new(http, &config.api_base_url, Arc::clone(&tokens)));
    let bars = Arc::new(StreamBarSource::new(config.stream.clone(), Arc::clone(&tokens)));

    // The cache is an optimization; failing to open it means running
    // without one, not aborting.
    let cache = match TtlCache::open(&config.cache.path, config.cache.lock_timeout).await {
        Ok(cache) => Some(Arc::new(cache)),
        Err(e) => {
            tracing::warn!(path = %config.cache.path, error = %e, "cache unavailable; running without");
            None
        }
    };

    let resolver = MarketDataResolver::new(
        metrics,
        bars,
        cache,
        ResolverConfig::from_settings(&config.fetch, &config.cache),
    );

    let records = resolver
        .get_market_data(&symbols)
        .await
        .context("resolving market data")?;

    let mut stdout = std::io::stdout().lock();
    for record in records.values() {
        serde_json::to_writer(&mut stdout, record)?;
        writeln!(stdout)?;
    }

    Ok(())
}

/// Load `.env` if present; absence is normal outside development.
fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded environment file"),
        Err(_) => tracing::debug!("no .env file found"),
    }
}
