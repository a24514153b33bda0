//! Streaming Protocol State Machines
//!
//! The handshake (connect → setup → authorize) and the per-fetch channel
//! workflow (open channel → configure feed → subscribe → collect → remove)
//! are modeled as explicit enum-tagged states. Transition functions take a
//! received frame and return the frames to send next, so the entire
//! protocol logic is testable with no socket: tests feed frames in and
//! assert on the frames out.
//!
//! The I/O shell in `client.rs` is the only place that touches the network.

use std::time::Duration;

use crate::domain::Bar;

use super::StreamError;
use super::messages::{
    AuthFrame, AuthStateFrame, AuthorizationState, CANDLE_EVENT_FIELDS, ChannelParameters,
    ChannelRequestFrame, FeedSetupFrame, FeedSubscriptionFrame, KeepaliveFrame, PROTOCOL_VERSION,
    SetupFrame, StreamFrame, SubscriptionEntry, decode_candles,
};

/// Daily aggregation period requested in FEED_SETUP, seconds.
const DAILY_AGGREGATION_SECS: f64 = 86_400.0;

// =============================================================================
// Handshake
// =============================================================================

/// Connection handshake phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeState {
    /// Nothing sent yet.
    #[default]
    Start,
    /// SETUP sent; awaiting the server's setup acknowledgement or first
    /// authorization state.
    SetupSent,
    /// AUTH sent; awaiting the authorization verdict.
    AuthSent,
    /// Venue reported `AUTHORIZED`; feed channels may be opened.
    Authorized,
    /// Terminal failure; the session is unusable.
    Failed,
}

/// Handshake state machine: SETUP → AUTH_STATE(UNAUTHORIZED) → AUTH →
/// AUTH_STATE(AUTHORIZED).
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    token: String,
    keepalive_secs: u64,
}

impl Handshake {
    /// Create a handshake carrying `token`.
    #[must_use]
    pub fn new(token: impl Into<String>, keepalive_interval: Duration) -> Self {
        Self {
            state: HandshakeState::Start,
            token: token.into(),
            keepalive_secs: keepalive_interval.as_secs().max(1),
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn state(&self) -> HandshakeState {
        self.state
    }

    /// Whether the venue granted authorization.
    #[must_use]
    pub const fn is_authorized(&self) -> bool {
        matches!(self.state, HandshakeState::Authorized)
    }

    /// Produce the opening SETUP frame.
    pub fn start(&mut self) -> StreamFrame {
        self.state = HandshakeState::SetupSent;
        StreamFrame::Setup(SetupFrame {
            channel: 0,
            version: PROTOCOL_VERSION.to_string(),
            keepalive_timeout: self.keepalive_secs * 2,
            accept_keepalive_timeout: self.keepalive_secs * 2,
        })
    }

    /// Advance on a received frame, returning the frames to send.
    ///
    /// # Errors
    ///
    /// [`StreamError::Unauthorized`] when the venue rejects the token or
    /// reports any terminal authorization state other than `AUTHORIZED`.
    pub fn on_frame(&mut self, frame: &StreamFrame) -> Result<Vec<StreamFrame>, StreamError> {
        match frame {
            // The server echoes SETUP as its acknowledgement; nothing to do
            // until it volunteers an authorization state.
            StreamFrame::Setup(_) => Ok(vec![]),

            StreamFrame::AuthState(AuthStateFrame { state, .. }) => match (self.state, state) {
                (HandshakeState::SetupSent, AuthorizationState::Unauthorized) => {
                    self.state = HandshakeState::AuthSent;
                    Ok(vec![StreamFrame::Auth(AuthFrame {
                        channel: 0,
                        token: self.token.clone(),
                    })])
                }
                (_, AuthorizationState::Authorized) => {
                    self.state = HandshakeState::Authorized;
                    Ok(vec![])
                }
                // UNAUTHORIZED after we presented the token is a rejection.
                (HandshakeState::AuthSent, AuthorizationState::Unauthorized) => {
                    self.state = HandshakeState::Failed;
                    Err(StreamError::Unauthorized)
                }
                _ => Ok(vec![]),
            },

            StreamFrame::Error(e) => {
                self.state = HandshakeState::Failed;
                Err(StreamError::Protocol(format!(
                    "venue error during handshake: {} ({})",
                    e.message, e.error
                )))
            }

            _ => Ok(vec![]),
        }
    }
}

/// Reply frame for a received keepalive. Answered immediately to avoid
/// idle disconnection.
#[must_use]
pub fn keepalive_reply() -> StreamFrame {
    StreamFrame::Keepalive(KeepaliveFrame { channel: 0 })
}

// =============================================================================
// Candle Fetch Channel
// =============================================================================

/// Lifecycle of one fetch's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// CHANNEL_REQUEST sent, awaiting CHANNEL_OPENED.
    Requested,
    /// FEED_SETUP sent, awaiting FEED_CONFIG.
    Configured,
    /// FEED_SUBSCRIPTION sent; data frames are expected.
    Subscribed,
    /// Subscription removed; the channel is done.
    Unsubscribed,
}

/// Channel workflow for one (symbol, interval, lookback) candle fetch.
///
/// Owned by the streaming client for the lifetime of one fetch and torn
/// down deterministically on completion, timeout, or error.
#[derive(Debug)]
pub struct CandleFetch {
    channel: u64,
    key: String,
    from_time_ms: i64,
    max_bars: usize,
    state: SubscriptionState,
    bars: Vec<Bar>,
}

impl CandleFetch {
    /// Create a fetch for `symbol` at `interval` (e.g. `1d`) on `channel`.
    #[must_use]
    pub fn new(
        channel: u64,
        symbol: &str,
        interval: &str,
        from_time_ms: i64,
        max_bars: usize,
    ) -> Self {
        Self {
            channel,
            key: format!("{symbol}{{={interval}}}"),
            from_time_ms,
            max_bars,
            state: SubscriptionState::Requested,
            bars: Vec::new(),
        }
    }

    /// Channel id this fetch owns.
    #[must_use]
    pub const fn channel(&self) -> u64 {
        self.channel
    }

    /// Symbol+interval key, e.g. `AAPL{=1d}`.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current subscription state.
    #[must_use]
    pub const fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Whether the configured maximum bar count has been reached.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.bars.len() >= self.max_bars
    }

    /// Bars collected so far.
    #[must_use]
    pub const fn collected(&self) -> usize {
        self.bars.len()
    }

    /// Produce the opening CHANNEL_REQUEST frame.
    #[must_use]
    pub fn open_frame(&self) -> StreamFrame {
        StreamFrame::ChannelRequest(ChannelRequestFrame {
            channel: self.channel,
            service: "FEED".to_string(),
            parameters: ChannelParameters {
                contract: "AUTO".to_string(),
            },
        })
    }

    /// Advance on a received frame, returning the frames to send.
    ///
    /// Frames for other channels are ignored. Candle rows accumulate up to
    /// the configured maximum.
    ///
    /// # Errors
    ///
    /// [`StreamError::ChannelRejected`] when the venue reports an error on
    /// this fetch's channel.
    pub fn on_frame(&mut self, frame: &StreamFrame) -> Result<Vec<StreamFrame>, StreamError> {
        match frame {
            StreamFrame::ChannelOpened(opened) if opened.channel == self.channel => {
                self.state = SubscriptionState::Configured;
                Ok(vec![StreamFrame::FeedSetup(FeedSetupFrame {
                    channel: self.channel,
                    accept_aggregation_period: DAILY_AGGREGATION_SECS,
                    accept_data_format: "COMPACT".to_string(),
                    accept_event_fields: [(
                        "Candle".to_string(),
                        CANDLE_EVENT_FIELDS.iter().map(ToString::to_string).collect(),
                    )]
                    .into_iter()
                    .collect(),
                })])
            }

            StreamFrame::FeedConfig(config) if config.channel == self.channel => {
                self.state = SubscriptionState::Subscribed;
                Ok(vec![StreamFrame::FeedSubscription(FeedSubscriptionFrame {
                    channel: self.channel,
                    add: vec![SubscriptionEntry {
                        event_type: "Candle".to_string(),
                        symbol: self.key.clone(),
                        from_time: Some(self.from_time_ms),
                    }],
                    remove: vec![],
                })])
            }

            StreamFrame::FeedData(data) if data.channel == self.channel => {
                let mut bars = decode_candles(&data.data);
                let room = self.max_bars.saturating_sub(self.bars.len());
                bars.truncate(room);
                self.bars.append(&mut bars);
                Ok(vec![])
            }

            StreamFrame::Error(e) if e.channel == self.channel => {
                Err(StreamError::ChannelRejected {
                    channel: self.channel,
                    reason: format!("{} ({})", e.message, e.error),
                })
            }

            _ => Ok(vec![]),
        }
    }

    /// Produce the teardown FEED_SUBSCRIPTION remove frame.
    pub fn unsubscribe_frame(&mut self) -> StreamFrame {
        self.state = SubscriptionState::Unsubscribed;
        StreamFrame::FeedSubscription(FeedSubscriptionFrame {
            channel: self.channel,
            add: vec![],
            remove: vec![SubscriptionEntry {
                event_type: "Candle".to_string(),
                symbol: self.key.clone(),
                from_time: None,
            }],
        })
    }

    /// Consume the fetch, yielding bars sorted ascending by time with
    /// duplicate timestamps removed.
    #[must_use]
    pub fn into_bars(self) -> Vec<Bar> {
        crate::domain::finalize_series(self.bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::stream::messages::{ChannelOpenedFrame, ErrorFrame, FeedConfigFrame, FeedDataFrame};
    use serde_json::json;

    fn auth_state(state: AuthorizationState) -> StreamFrame {
        StreamFrame::AuthState(AuthStateFrame { channel: 0, state })
    }

    #[test]
    fn handshake_happy_path() {
        let mut handshake = Handshake::new("tok-123", Duration::from_secs(30));

        let setup = handshake.start();
        assert!(matches!(setup, StreamFrame::Setup(_)));
        assert_eq!(handshake.state(), HandshakeState::SetupSent);

        // Server echoes SETUP; no response required.
        assert!(handshake.on_frame(&setup).unwrap().is_empty());

        // UNAUTHORIZED is expected on first contact and triggers AUTH.
        let out = handshake
            .on_frame(&auth_state(AuthorizationState::Unauthorized))
            .unwrap();
        assert_eq!(out.len(), 1);
        match &out[0] {
            StreamFrame::Auth(auth) => assert_eq!(auth.token, "tok-123"),
            other => panic!("expected AUTH, got {other:?}"),
        }
        assert_eq!(handshake.state(), HandshakeState::AuthSent);

        assert!(handshake
            .on_frame(&auth_state(AuthorizationState::Authorized))
            .unwrap()
            .is_empty());
        assert!(handshake.is_authorized());
    }

    #[test]
    fn handshake_rejection_after_auth_is_fatal() {
        let mut handshake = Handshake::new("bad-token", Duration::from_secs(30));
        let _ = handshake.start();

        let _ = handshake
            .on_frame(&auth_state(AuthorizationState::Unauthorized))
            .unwrap();

        let err = handshake
            .on_frame(&auth_state(AuthorizationState::Unauthorized))
            .unwrap_err();
        assert!(matches!(err, StreamError::Unauthorized));
        assert_eq!(handshake.state(), HandshakeState::Failed);
    }

    #[test]
    fn handshake_immediate_authorized_is_accepted() {
        // Some venues skip the UNAUTHORIZED round when the connection
        // carries ambient authorization.
        let mut handshake = Handshake::new("tok", Duration::from_secs(30));
        let _ = handshake.start();

        assert!(handshake
            .on_frame(&auth_state(AuthorizationState::Authorized))
            .unwrap()
            .is_empty());
        assert!(handshake.is_authorized());
    }

    #[test]
    fn handshake_error_frame_fails_session() {
        let mut handshake = Handshake::new("tok", Duration::from_secs(30));
        let _ = handshake.start();

        let err = handshake
            .on_frame(&StreamFrame::Error(ErrorFrame {
                channel: 0,
                error: "UNSUPPORTED_PROTOCOL".to_string(),
                message: "bad version".to_string(),
            }))
            .unwrap_err();
        assert!(matches!(err, StreamError::Protocol(_)));
    }

    fn opened(channel: u64) -> StreamFrame {
        StreamFrame::ChannelOpened(ChannelOpenedFrame {
            channel,
            service: "FEED".to_string(),
        })
    }

    fn config(channel: u64) -> StreamFrame {
        StreamFrame::FeedConfig(FeedConfigFrame {
            channel,
            data_format: Some("COMPACT".to_string()),
            aggregation_period: None,
            event_fields: None,
        })
    }

    fn candle_data(channel: u64, times: &[i64]) -> StreamFrame {
        let rows: Vec<serde_json::Value> = std::iter::once(json!("Candle"))
            .chain(times.iter().map(|t| {
                json!(["AAPL{=1d}", 0, t, 1, 1, 150.0, 152.0, 149.0, 151.0, 1.0e6])
            }))
            .collect();
        StreamFrame::FeedData(FeedDataFrame {
            channel,
            data: vec![serde_json::Value::Array(rows)],
        })
    }

    #[test]
    fn candle_fetch_walks_the_channel_lifecycle() {
        let mut fetch = CandleFetch::new(3, "AAPL", "1d", 1_600_000_000_000, 100);
        assert_eq!(fetch.state(), SubscriptionState::Requested);
        assert_eq!(fetch.key(), "AAPL{=1d}");

        assert!(matches!(fetch.open_frame(), StreamFrame::ChannelRequest(_)));

        let out = fetch.on_frame(&opened(3)).unwrap();
        assert_eq!(fetch.state(), SubscriptionState::Configured);
        match &out[0] {
            StreamFrame::FeedSetup(setup) => {
                assert_eq!(setup.accept_data_format, "COMPACT");
                let fields = &setup.accept_event_fields["Candle"];
                assert_eq!(fields[8], "close");
            }
            other => panic!("expected FEED_SETUP, got {other:?}"),
        }

        let out = fetch.on_frame(&config(3)).unwrap();
        assert_eq!(fetch.state(), SubscriptionState::Subscribed);
        match &out[0] {
            StreamFrame::FeedSubscription(sub) => {
                assert_eq!(sub.add[0].symbol, "AAPL{=1d}");
                assert_eq!(sub.add[0].from_time, Some(1_600_000_000_000));
            }
            other => panic!("expected FEED_SUBSCRIPTION, got {other:?}"),
        }

        assert!(fetch.on_frame(&candle_data(3, &[1, 2, 3])).unwrap().is_empty());
        assert_eq!(fetch.collected(), 3);

        let teardown = fetch.unsubscribe_frame();
        assert_eq!(fetch.state(), SubscriptionState::Unsubscribed);
        match teardown {
            StreamFrame::FeedSubscription(sub) => {
                assert!(sub.add.is_empty());
                assert_eq!(sub.remove[0].symbol, "AAPL{=1d}");
            }
            other => panic!("expected FEED_SUBSCRIPTION, got {other:?}"),
        }

        let bars = fetch.into_bars();
        assert_eq!(bars.len(), 3);
    }

    #[test]
    fn candle_fetch_ignores_other_channels() {
        let mut fetch = CandleFetch::new(3, "AAPL", "1d", 0, 100);
        assert!(fetch.on_frame(&opened(5)).unwrap().is_empty());
        assert_eq!(fetch.state(), SubscriptionState::Requested);

        let _ = fetch.on_frame(&opened(3)).unwrap();
        let _ = fetch.on_frame(&config(3)).unwrap();
        let _ = fetch.on_frame(&candle_data(5, &[1, 2])).unwrap();
        assert_eq!(fetch.collected(), 0);
    }

    #[test]
    fn candle_fetch_caps_at_max_bars() {
        let mut fetch = CandleFetch::new(1, "SPY", "1d", 0, 2);
        let _ = fetch.on_frame(&opened(1)).unwrap();
        let _ = fetch.on_frame(&config(1)).unwrap();
        let _ = fetch.on_frame(&candle_data(1, &[1, 2, 3, 4])).unwrap();

        assert!(fetch.is_complete());
        assert_eq!(fetch.into_bars().len(), 2);
    }

    #[test]
    fn candle_fetch_error_on_own_channel_is_fatal() {
        let mut fetch = CandleFetch::new(7, "QQQ", "1d", 0, 10);
        let err = fetch
            .on_frame(&StreamFrame::Error(ErrorFrame {
                channel: 7,
                error: "INVALID_MESSAGE".to_string(),
                message: "no".to_string(),
            }))
            .unwrap_err();
        assert!(matches!(err, StreamError::ChannelRejected { channel: 7, .. }));
    }
}
