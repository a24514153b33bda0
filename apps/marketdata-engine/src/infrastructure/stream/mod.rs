//! Streaming Market-Data Adapter
//!
//! Historical daily candles come from the venue's WebSocket feed: a
//! session is established and authorized once per fetch, a feed channel is
//! negotiated, and the historical replay is collected until the stream
//! goes quiet or the bar budget is reached.
//!
//! Module layout mirrors the protocol's separation of concerns:
//! - [`messages`]: wire-format frame types and positional candle decoding
//! - [`protocol`]: pure handshake and channel state machines
//! - [`client`]: the WebSocket I/O shell driving the state machines

pub mod client;
pub mod messages;
pub mod protocol;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::application::ports::{BarProvider, ProviderError};
use crate::config::StreamSettings;
use crate::domain::Bar;
use crate::infrastructure::auth::TokenManager;

pub use client::DxLinkClient;

/// Streaming session errors.
#[derive(Debug, Error)]
pub enum StreamError {
    /// TCP/TLS connection to the venue failed.
    #[error("stream connection failed: {0}")]
    ConnectionFailed(String),

    /// WebSocket transport error mid-session.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The venue rejected the session token.
    #[error("stream authorization rejected")]
    Unauthorized,

    /// The venue refused or errored a feed channel.
    #[error("feed channel {channel} rejected: {reason}")]
    ChannelRejected {
        /// Channel id the venue refused.
        channel: u64,
        /// Venue-supplied reason.
        reason: String,
    },

    /// The venue violated the expected message sequence.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A deadline elapsed before the session reached the required state.
    #[error("stream timed out: {0}")]
    Timeout(String),

    /// A frame failed to encode or decode.
    #[error("frame codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<StreamError> for ProviderError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::Unauthorized => Self::Authentication(e.to_string()),
            StreamError::Codec(_) | StreamError::Protocol(_) => Self::Decode(e.to_string()),
            StreamError::ConnectionFailed(_) | StreamError::WebSocket(_) => {
                Self::Connection(e.to_string())
            }
            StreamError::ChannelRejected { .. } | StreamError::Timeout(_) => {
                Self::Unavailable(e.to_string())
            }
        }
    }
}

/// [`BarProvider`] backed by a per-fetch streaming session.
///
/// Each call connects, authorizes, fetches one symbol's daily history, and
/// disconnects. Concurrency is bounded upstream by the resolver, so the
/// venue never sees more simultaneous sessions than the configured fetch
/// parallelism.
#[derive(Debug)]
pub struct StreamBarSource {
    settings: StreamSettings,
    tokens: Arc<TokenManager>,
}

impl StreamBarSource {
    /// Create a bar source for the configured venue endpoint.
    #[must_use]
    pub fn new(settings: StreamSettings, tokens: Arc<TokenManager>) -> Self {
        Self { settings, tokens }
    }
}

#[async_trait]
impl BarProvider for StreamBarSource {
    async fn daily_bars(&self, symbol: &str, lookback_days: u32) -> Result<Vec<Bar>, ProviderError> {
        let token = self
            .tokens
            .get_valid_token()
            .await
            .map_err(|e| ProviderError::Authentication(e.to_string()))?;

        let mut client = DxLinkClient::connect(&self.settings, token.access_token())
            .await
            .map_err(ProviderError::from)?;

        let result = client.fetch_daily_bars(symbol, lookback_days).await;
        client.disconnect().await;

        result.map_err(ProviderError::from)
    }
}
