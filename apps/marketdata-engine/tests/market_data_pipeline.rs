//! End-to-end resolver tests: mock HTTP endpoints, a real on-disk TTL
//! cache, and a scripted bar source standing in for the streaming venue.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use marketdata_engine::application::{
    BarProvider, MarketDataResolver, ProviderError, ResolverConfig,
};
use marketdata_engine::config::Credentials;
use marketdata_engine::domain::{Bar, DataSource, DataWarning};
use marketdata_engine::infrastructure::auth::TokenManager;
use marketdata_engine::infrastructure::cache::TtlCache;
use marketdata_engine::infrastructure::rest::MetricsApiClient;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Bar source with canned close series and a call counter, standing in for
/// the streaming client.
struct ScriptedBars {
    closes: HashMap<String, Vec<f64>>,
    calls: AtomicUsize,
}

impl ScriptedBars {
    fn new(closes: HashMap<String, Vec<f64>>) -> Self {
        Self {
            closes,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl BarProvider for ScriptedBars {
    async fn daily_bars(
        &self,
        symbol: &str,
        _lookback_days: u32,
    ) -> Result<Vec<Bar>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let closes = self.closes.get(symbol).cloned().unwrap_or_default();
        Ok(closes
            .iter()
            .enumerate()
            .map(|(i, close)| Bar {
                symbol: symbol.to_string(),
                time: i as i64 * 86_400_000,
                open: *close,
                high: *close,
                low: *close,
                close: *close,
                volume: 1000.0,
            })
            .collect())
    }
}

/// 300 closes with a constant 1% log step; enough for every HV window.
fn long_series() -> Vec<f64> {
    let mut closes = vec![100.0];
    for i in 1..300 {
        closes.push(closes[i - 1] * 0.01_f64.exp());
    }
    closes
}

async fn mount_token_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "test-token",
            "expires_in": 900
        })))
        .mount(server)
        .await;
}

fn metrics_body(symbol: &str) -> serde_json::Value {
    serde_json::json!({
        "data": {
            "items": [{
                "symbol": symbol,
                "last-price": "189.30",
                "updated-at": chrono::Utc::now().to_rfc3339(),
                "implied-volatility-index": "0.2513",
                "implied-volatility-index-rank": 0.41,
                "implied-volatility-percentile": 0.62,
                "historical-volatility-30-day": 0.198,
                "historical-volatility-90-day": 0.221,
                "historical-volatility-one-year": 0.243
            }]
        }
    })
}

fn build_resolver(
    server: &MockServer,
    bars: Arc<ScriptedBars>,
    cache: Option<Arc<TtlCache>>,
) -> MarketDataResolver {
    let http = reqwest::Client::new();
    let credentials = Credentials::new("id", "secret", "refresh").unwrap();
    let tokens = Arc::new(TokenManager::new(http.clone(), &server.uri(), credentials));
    let metrics = Arc::new(MetricsApiClient::new(http, &server.uri(), tokens));

    MarketDataResolver::new(metrics, bars, cache, ResolverConfig::default())
}

#[tokio::test]
async fn warm_cache_makes_the_second_call_free() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    // One metrics round trip total; the second resolve must be served
    // entirely from the cache.
    Mock::given(method("GET"))
        .and(path("/market-metrics"))
        .and(query_param("symbols", "AAPL"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(metrics_body("AAPL")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("cache.db");
    let cache = Arc::new(
        TtlCache::open(cache_path.to_str().unwrap(), std::time::Duration::from_secs(5))
            .await
            .unwrap(),
    );

    let bars = Arc::new(ScriptedBars::new(HashMap::from([(
        "AAPL".to_string(),
        long_series(),
    )])));
    let resolver = build_resolver(&server, Arc::clone(&bars), Some(cache));

    let symbols = vec!["AAPL".to_string()];

    let first = resolver.get_market_data(&symbols).await.unwrap();
    let record = &first["AAPL"];
    assert_eq!(record.data_source, DataSource::Rest);
    assert_eq!(record.price, Some(189.30));
    assert_eq!(record.implied_volatility, Some(25.13));
    assert_eq!(record.hv30, Some(19.8));
    assert!(record.return_series.is_some());
    assert_eq!(bars.calls.load(Ordering::SeqCst), 1);

    let second = resolver.get_market_data(&symbols).await.unwrap();
    let cached = &second["AAPL"];
    assert_eq!(cached.data_source, DataSource::Cache);
    assert_eq!(cached.price, Some(189.30));
    assert_eq!(cached.hv30, Some(19.8));
    // No second bar fetch either; the expect(1) above guards the HTTP side.
    assert_eq!(bars.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transient_metrics_failures_are_retried() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("GET"))
        .and(path("/market-metrics"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/market-metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(metrics_body("MSFT")))
        .expect(1)
        .mount(&server)
        .await;

    let bars = Arc::new(ScriptedBars::new(HashMap::from([(
        "MSFT".to_string(),
        long_series(),
    )])));
    let resolver = build_resolver(&server, bars, None);

    let records = resolver
        .get_market_data(&["MSFT".to_string()])
        .await
        .unwrap();
    assert_eq!(records["MSFT"].price, Some(189.30));
}

#[tokio::test]
async fn missing_symbol_gets_fetch_error_without_dropping_the_rest() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("GET"))
        .and(path("/market-metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(metrics_body("AAPL")))
        .mount(&server)
        .await;

    let bars = Arc::new(ScriptedBars::new(HashMap::new()));
    let resolver = build_resolver(&server, bars, None);

    let symbols = vec!["AAPL".to_string(), "ZZZZ".to_string()];
    let records = resolver.get_market_data(&symbols).await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records["AAPL"].price, Some(189.30));

    let failed = &records["ZZZZ"];
    assert_eq!(failed.warning, Some(DataWarning::FetchError));
    assert!(failed.price.is_none());
    assert!(failed.hv30.is_none());
}

#[tokio::test]
async fn rejected_token_aborts_the_whole_batch() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let bars = Arc::new(ScriptedBars::new(HashMap::new()));
    let resolver = build_resolver(&server, bars, None);

    let err = resolver
        .get_market_data(&["AAPL".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        marketdata_engine::application::ResolverError::Authentication(_)
    ));
}

#[tokio::test]
async fn hv_gaps_are_backfilled_from_bars() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    // Metrics without any historical-volatility fields.
    Mock::given(method("GET"))
        .and(path("/market-metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {
                "items": [{
                    "symbol": "TSLA",
                    "last-price": 250.0,
                    "updated-at": chrono::Utc::now().to_rfc3339(),
                    "implied-volatility-index": 0.55
                }]
            }
        })))
        .mount(&server)
        .await;

    let bars = Arc::new(ScriptedBars::new(HashMap::from([(
        "TSLA".to_string(),
        long_series(),
    )])));
    let resolver = build_resolver(&server, bars, None);

    let records = resolver
        .get_market_data(&["TSLA".to_string()])
        .await
        .unwrap();
    let record = &records["TSLA"];

    assert_eq!(record.data_source, DataSource::Stream);
    assert_eq!(record.price, Some(250.0));
    assert_eq!(record.implied_volatility, Some(55.0));
    // Constant log-step closes have (near-)zero realized volatility.
    assert!(record.hv30.unwrap() < 1e-9);
    assert!(record.hv90.unwrap() < 1e-9);
    assert!(record.hv252.unwrap() < 1e-9);
    assert_eq!(record.return_series.as_ref().map(Vec::len), Some(299));
}
