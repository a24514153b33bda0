//! Streaming Venue WebSocket Client
//!
//! I/O shell around the protocol state machines in [`super::protocol`]:
//! owns the socket, pumps frames in and out, answers keepalives, and
//! enforces the read and fetch deadlines. All sequencing decisions live in
//! the state machines; this module only moves bytes.

use std::time::Instant;

use chrono::{Duration as ChronoDuration, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::config::StreamSettings;
use crate::domain::Bar;

use super::StreamError;
use super::messages::StreamFrame;
use super::protocol::{CandleFetch, Handshake, SubscriptionState, keepalive_reply};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Authorized streaming session over one WebSocket connection.
pub struct DxLinkClient {
    socket: Socket,
    settings: StreamSettings,
    next_channel: u64,
}

impl DxLinkClient {
    /// Connect to the venue and complete the authorization handshake.
    ///
    /// # Errors
    ///
    /// [`StreamError::ConnectionFailed`] when the socket cannot be
    /// established, [`StreamError::Unauthorized`] when the venue rejects
    /// the token, [`StreamError::Timeout`] when the handshake does not
    /// complete within the fetch deadline.
    pub async fn connect(settings: &StreamSettings, token: &str) -> Result<Self, StreamError> {
        let (socket, _response) = connect_async(settings.url.as_str())
            .await
            .map_err(|e| StreamError::ConnectionFailed(format!("{}: {e}", settings.url)))?;

        tracing::debug!(url = %settings.url, "stream connected");

        let mut client = Self {
            socket,
            settings: settings.clone(),
            next_channel: 1,
        };

        client.authorize(token).await?;
        Ok(client)
    }

    async fn authorize(&mut self, token: &str) -> Result<(), StreamError> {
        let mut handshake = Handshake::new(token, self.settings.keepalive_interval);
        self.send_frame(&handshake.start()).await?;

        let deadline = Instant::now() + self.settings.fetch_deadline;
        while !handshake.is_authorized() {
            let frame = self.read_frame(deadline, "authorization handshake").await?;

            if let StreamFrame::Keepalive(_) = frame {
                self.send_frame(&keepalive_reply()).await?;
                continue;
            }

            for reply in handshake.on_frame(&frame)? {
                self.send_frame(&reply).await?;
            }
        }

        tracing::debug!("stream session authorized");
        Ok(())
    }

    /// Fetch up to the configured maximum of daily bars for `symbol`,
    /// reaching back `lookback_days` calendar days.
    ///
    /// The replay is considered complete when the bar budget is reached or
    /// the feed goes quiet for one read-timeout interval. The subscription
    /// is removed before returning, success or not.
    ///
    /// # Errors
    ///
    /// Fails when the channel is rejected, the fetch deadline elapses
    /// before any data arrives, or the transport drops.
    pub async fn fetch_daily_bars(
        &mut self,
        symbol: &str,
        lookback_days: u32,
    ) -> Result<Vec<Bar>, StreamError> {
        let channel = self.next_channel;
        self.next_channel += 1;

        let from_time_ms = (Utc::now() - ChronoDuration::days(i64::from(lookback_days)))
            .timestamp_millis();

        let mut fetch = CandleFetch::new(
            channel,
            symbol,
            "1d",
            from_time_ms,
            self.settings.max_bars,
        );
        self.send_frame(&fetch.open_frame()).await?;

        let deadline = Instant::now() + self.settings.fetch_deadline;
        let outcome = self.collect(&mut fetch, deadline).await;

        // Best-effort teardown; the venue drops the subscription with the
        // connection anyway.
        let unsubscribe = fetch.unsubscribe_frame();
        if let Err(e) = self.send_frame(&unsubscribe).await {
            tracing::debug!(error = %e, channel, "unsubscribe frame not delivered");
        }

        outcome?;

        let bars = fetch.into_bars();
        tracing::debug!(symbol, channel, bars = bars.len(), "candle replay collected");
        Ok(bars)
    }

    async fn collect(
        &mut self,
        fetch: &mut CandleFetch,
        deadline: Instant,
    ) -> Result<(), StreamError> {
        while !fetch.is_complete() {
            let frame = match self.read_frame(deadline, "candle replay").await {
                Ok(frame) => frame,
                // Once subscribed, silence means the historical replay has
                // drained; whatever was collected is the result.
                Err(StreamError::Timeout(_))
                    if fetch.state() == SubscriptionState::Subscribed =>
                {
                    return Ok(());
                }
                // A venue-side close mid-replay keeps the collected bars
                // too; with nothing collected it stays an error so the
                // symbol is marked unavailable.
                Err(StreamError::ConnectionFailed(_))
                    if fetch.state() == SubscriptionState::Subscribed
                        && fetch.collected() > 0 =>
                {
                    tracing::debug!(
                        bars = fetch.collected(),
                        "stream closed mid-replay; using collected bars"
                    );
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            if let StreamFrame::Keepalive(_) = frame {
                self.send_frame(&keepalive_reply()).await?;
                continue;
            }

            for reply in fetch.on_frame(&frame)? {
                self.send_frame(&reply).await?;
            }
        }

        Ok(())
    }

    /// Close the session. Errors are logged, not surfaced; the connection
    /// is gone either way.
    pub async fn disconnect(mut self) {
        if let Err(e) = self.socket.close(None).await {
            tracing::debug!(error = %e, "stream close failed");
        }
    }

    async fn send_frame(&mut self, frame: &StreamFrame) -> Result<(), StreamError> {
        let text = serde_json::to_string(frame)?;
        tracing::trace!(%text, "stream send");
        self.socket.send(Message::text(text)).await?;
        Ok(())
    }

    /// Read the next decodable frame, bounded by the per-read timeout and
    /// the overall `deadline`. Undecodable text and non-text messages are
    /// skipped; pings are answered by the transport layer.
    async fn read_frame(
        &mut self,
        deadline: Instant,
        phase: &str,
    ) -> Result<StreamFrame, StreamError> {
        loop {
            let remaining = deadline
                .saturating_duration_since(Instant::now())
                .min(self.settings.read_timeout);
            if remaining.is_zero() {
                return Err(StreamError::Timeout(phase.to_string()));
            }

            let message = tokio::time::timeout(remaining, self.socket.next())
                .await
                .map_err(|_| StreamError::Timeout(phase.to_string()))?;

            match message {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<StreamFrame>(&text) {
                        Ok(StreamFrame::Unknown) => {
                            tracing::debug!("skipping unrecognized frame type");
                        }
                        Ok(frame) => {
                            tracing::trace!(?frame, "stream recv");
                            return Ok(frame);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "skipping undecodable frame");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(StreamError::ConnectionFailed(format!(
                        "connection closed during {phase}"
                    )));
                }
                Some(Ok(_)) => {} // ping/pong/binary; nothing to decode
                Some(Err(e)) => return Err(StreamError::WebSocket(e)),
            }
        }
    }
}

impl std::fmt::Debug for DxLinkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DxLinkClient")
            .field("url", &self.settings.url)
            .field("next_channel", &self.next_channel)
            .finish_non_exhaustive()
    }
}
