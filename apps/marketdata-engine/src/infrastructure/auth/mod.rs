//! Token Manager
//!
//! Holds the OAuth access token for the batch API and the streaming venue,
//! refreshing it on expiry by exchanging the long-lived refresh credential.
//!
//! # Concurrency
//!
//! `get_valid_token` is callable from many tasks at once. The fast path
//! (token present and unexpired) takes only a read lock. On expiry, callers
//! funnel through one async mutex; the first performs the single network
//! round trip and every waiter re-checks and returns the now-fresh token.
//! Under N concurrent callers with an expired token, exactly one refresh
//! call occurs.
//!
//! # Token Endpoint
//!
//! `POST {base}/oauth/token` with `grant_type=refresh_token`, client
//! id/secret, and the refresh token; JSON response with `access_token` and
//! `expires_in` seconds.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::Credentials;

/// Margin subtracted from the literal expiry so a token is never used
/// within a minute of dying mid-request.
pub const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(60);

// =============================================================================
// Error Type
// =============================================================================

/// Errors from the token refresh flow.
///
/// All variants are fatal configuration problems for work that needs the
/// token; the refresh is not retried indefinitely.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// The token endpoint rejected the credentials.
    #[error("token endpoint rejected credentials (HTTP {status})")]
    InvalidCredentials {
        /// HTTP status returned by the endpoint.
        status: u16,
    },

    /// The token endpoint could not be reached.
    #[error("token endpoint request failed: {0}")]
    Http(String),

    /// The token endpoint answered with something unexpected.
    #[error("token endpoint returned malformed response: {0}")]
    Decode(String),
}

// =============================================================================
// Token
// =============================================================================

/// An access token with its effective expiry.
///
/// Never persisted to the cache; lives only in process memory.
#[derive(Clone)]
pub struct Token {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl Token {
    /// Create a token from the endpoint's `expires_in` seconds, applying
    /// the safety margin.
    #[must_use]
    pub fn new(access_token: String, expires_in_secs: i64) -> Self {
        let margin = chrono::Duration::from_std(EXPIRY_SAFETY_MARGIN)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let expires_at = Utc::now() + chrono::Duration::seconds(expires_in_secs) - margin;
        Self {
            access_token,
            expires_at,
        }
    }

    /// The bearer token string.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Whether the effective expiry has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// =============================================================================
// Wire Format
// =============================================================================

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: i64,
}

// =============================================================================
// Token Manager
// =============================================================================

/// Concurrent-safe holder of the current access token.
pub struct TokenManager {
    http: reqwest::Client,
    token_url: String,
    credentials: Credentials,
    current: RwLock<Option<Token>>,
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    /// Create a token manager for the given API base URL.
    #[must_use]
    pub fn new(http: reqwest::Client, api_base_url: &str, credentials: Credentials) -> Self {
        Self {
            http,
            token_url: format!("{}/oauth/token", api_base_url.trim_end_matches('/')),
            credentials,
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Get a valid token, refreshing it if expired or absent.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the refresh round trip fails; callers
    /// surface this as a fatal configuration problem.
    pub async fn get_valid_token(&self) -> Result<Token, AuthError> {
        if let Some(token) = self.fresh_token() {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        if let Some(token) = self.fresh_token() {
            return Ok(token);
        }

        tracing::debug!(url = %self.token_url, "refreshing access token");
        let token = self.refresh().await?;
        *self.current.write() = Some(token.clone());
        Ok(token)
    }

    /// Read the current token if it is still usable.
    fn fresh_token(&self) -> Option<Token> {
        self.current
            .read()
            .as_ref()
            .filter(|token| !token.is_expired())
            .cloned()
    }

    /// Perform the single refresh round trip.
    async fn refresh(&self) -> Result<Token, AuthError> {
        let request = RefreshRequest {
            grant_type: "refresh_token",
            client_id: self.credentials.client_id(),
            client_secret: self.credentials.client_secret(),
            refresh_token: self.credentials.refresh_token(),
        };

        let response = self
            .http
            .post(&self.token_url)
            .form(&request)
            .send()
            .await
            .map_err(|e| AuthError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(AuthError::InvalidCredentials {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(AuthError::Http(format!(
                "token endpoint returned HTTP {status}"
            )));
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Decode(e.to_string()))?;

        tracing::info!(expires_in = body.expires_in, "access token refreshed");
        Ok(Token::new(body.access_token, body.expires_in))
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("token_url", &self.token_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_expiry_applies_safety_margin() {
        // 90 seconds minus the 60 second margin leaves ~30 seconds of life.
        let token = Token::new("abc".to_string(), 90);
        assert!(!token.is_expired());

        // At or below the margin the token is born expired.
        let token = Token::new("abc".to_string(), 60);
        assert!(token.is_expired());
    }

    #[test]
    fn token_debug_redacts_secret() {
        let token = Token::new("super-secret-token".to_string(), 900);
        let debug = format!("{token:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super-secret-token"));
    }
}
