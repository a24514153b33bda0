//! Engine Configuration Settings
//!
//! Configuration types for the market-data engine, loaded from environment
//! variables.
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
//! - `MD_CACHE_PATH`: TTL cache database file (default: `marketdata-cache.db`)
//! - `MD_FETCH_PARALLELISM`: concurrent streaming fetches (default: 3)
//! - `MD_STALE_AFTER_SECS`: price staleness threshold (default: 900)

use std::time::Duration;

use thiserror::Error;

/// Default batch API base URL.
const DEFAULT_API_BASE_URL: &str = "https://api.tastyworks.com";

/// Default streaming venue URL.
const DEFAULT_STREAM_URL: &str = "wss://tasty-openapi-ws.dxfeed.com/realtime";

/// Default cache database file.
const DEFAULT_CACHE_PATH: &str = "marketdata-cache.db";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing or empty.
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    /// An environment variable could not be parsed.
    #[error("invalid value for {var}: {value}")]
    InvalidVar {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
}

/// OAuth credentials for the batch API and token endpoint.
///
/// The `Debug` implementation redacts secrets for safe logging.
#[derive(Clone)]
pub struct Credentials {
    client_id: String,
    client_secret: String,
    refresh_token: String,
}

impl Credentials {
    /// Create new credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if any component is empty.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let client_id = client_id.into();
        let client_secret = client_secret.into();
        let refresh_token = refresh_token.into();

        if client_id.is_empty() {
            return Err(ConfigError::MissingVar("TASTY_CLIENT_ID"));
        }
        if client_secret.is_empty() {
            return Err(ConfigError::MissingVar("TASTY_CLIENT_SECRET"));
        }
        if refresh_token.is_empty() {
            return Err(ConfigError::MissingVar("TASTY_REFRESH_TOKEN"));
        }

        Ok(Self {
            client_id,
            client_secret,
            refresh_token,
        })
    }

    /// Get the OAuth client id.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Get the OAuth client secret.
    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// Get the refresh token.
    #[must_use]
    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

/// Streaming venue connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// WebSocket URL of the venue.
    pub url: String,
    /// Keepalive interval declared in the SETUP frame.
    pub keepalive_interval: Duration,
    /// Per-read idle timeout; an idle stream ends collection gracefully.
    pub read_timeout: Duration,
    /// Overall deadline for one symbol's fetch.
    pub fetch_deadline: Duration,
    /// Maximum bars collected per fetch.
    pub max_bars: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            keepalive_interval: Duration::from_secs(30),
            read_timeout: Duration::from_secs(5),
            fetch_deadline: Duration::from_secs(30),
            max_bars: 500,
        }
    }
}

/// Resolver fetch settings.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Maximum concurrent streaming fetches.
    pub parallelism: usize,
    /// Price age beyond which a record is marked stale.
    pub stale_after: Duration,
    /// Calendar-day lookback for daily-bar fetches. Sized so that a full
    /// 252-trading-day window survives weekends and holidays.
    pub lookback_days: u32,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            parallelism: 3,
            stale_after: Duration::from_secs(900),
            lookback_days: 420,
        }
    }
}

/// TTL cache settings.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Database file path.
    pub path: String,
    /// TTL for price entries.
    pub price_ttl: Duration,
    /// TTL for implied-volatility entries.
    pub iv_ttl: Duration,
    /// TTL for realized-volatility entries.
    pub hv_ttl: Duration,
    /// Bound on waiting for the store connection before failing loudly.
    pub lock_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            path: DEFAULT_CACHE_PATH.to_string(),
            price_ttl: Duration::from_secs(15 * 60),
            iv_ttl: Duration::from_secs(60 * 60),
            hv_ttl: Duration::from_secs(24 * 60 * 60),
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// OAuth credentials.
    pub credentials: Credentials,
    /// Batch metrics / token API base URL.
    pub api_base_url: String,
    /// Streaming venue settings.
    pub stream: StreamSettings,
    /// Resolver fetch settings.
    pub fetch: FetchSettings,
    /// Cache settings.
    pub cache: CacheSettings,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a numeric
    /// variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let credentials = Credentials::new(
            env_or_default("TASTY_CLIENT_ID", ""),
            env_or_default("TASTY_CLIENT_SECRET", ""),
            env_or_default("TASTY_REFRESH_TOKEN", ""),
        )?;

        let api_base_url = env_or_default("TASTY_API_BASE_URL", DEFAULT_API_BASE_URL);

        let stream = StreamSettings {
            url: env_or_default("DXLINK_URL", DEFAULT_STREAM_URL),
            ..StreamSettings::default()
        };

        let defaults = FetchSettings::default();
        let fetch = FetchSettings {
            parallelism: parse_env("MD_FETCH_PARALLELISM")?.unwrap_or(defaults.parallelism),
            stale_after: parse_env::<u64>("MD_STALE_AFTER_SECS")?
                .map_or(defaults.stale_after, Duration::from_secs),
            ..defaults
        };

        let cache = CacheSettings {
            path: env_or_default("MD_CACHE_PATH", DEFAULT_CACHE_PATH),
            ..CacheSettings::default()
        };

        Ok(Self {
            credentials,
            api_base_url,
            stream,
            fetch,
            cache,
        })
    }
}

/// Read an environment variable with a fallback default.
fn env_or_default(var: &str, default: &str) -> String {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Parse an optional numeric environment variable.
fn parse_env<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidVar { var, value }),
        _ => Ok(None),
    }
}
