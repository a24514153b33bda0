//! Streaming Venue Message Types
//!
//! Wire format for the venue's dxLink-style protocol: JSON text frames
//! discriminated by a `type` field, exchanged over one duplex WebSocket.
//!
//! # Frame Types
//!
//! ## Connection lifecycle (channel 0)
//! - `SETUP`: protocol version and keepalive declaration (client and server)
//! - `AUTH_STATE`: server reports `UNAUTHORIZED` or `AUTHORIZED`
//! - `AUTH`: client presents the bearer token
//! - `KEEPALIVE`: liveness; every received keepalive is answered in kind
//!
//! ## Feed lifecycle (per data channel)
//! - `CHANNEL_REQUEST` / `CHANNEL_OPENED`: allocate a feed channel
//! - `FEED_SETUP` / `FEED_CONFIG`: declare the ordered per-event field list
//!   and the compact encoding preference
//! - `FEED_SUBSCRIPTION`: add/remove a symbol+interval subscription
//! - `FEED_DATA`: event payloads, decoded positionally per the field list
//!
//! `FEED_DATA` carries tuples of `[eventType, [field...], [field...], ...]`.
//! Only `Candle` events are decoded here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::Bar;

/// Protocol version declared in the SETUP frame.
pub const PROTOCOL_VERSION: &str = "0.1-js/1.0.0";

/// The ordered Candle field list declared in FEED_SETUP. FEED_DATA rows for
/// `Candle` carry exactly these fields in exactly this order.
pub const CANDLE_EVENT_FIELDS: [&str; 10] = [
    "eventSymbol",
    "eventTime",
    "time",
    "sequence",
    "count",
    "open",
    "high",
    "low",
    "close",
    "volume",
];

/// Positional index of `time` within a Candle row.
const FIELD_TIME: usize = 2;
/// Positional index of `open` within a Candle row.
const FIELD_OPEN: usize = 5;
/// Positional index of `close` within a Candle row.
const FIELD_CLOSE: usize = 8;
/// Positional index of `volume` within a Candle row.
const FIELD_VOLUME: usize = 9;

// =============================================================================
// Frames
// =============================================================================

/// One frame of the venue protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamFrame {
    /// Connection setup / acknowledgement.
    #[serde(rename = "SETUP")]
    Setup(SetupFrame),
    /// Server-reported authorization state.
    #[serde(rename = "AUTH_STATE")]
    AuthState(AuthStateFrame),
    /// Client authorization with bearer token.
    #[serde(rename = "AUTH")]
    Auth(AuthFrame),
    /// Client request for a feed channel.
    #[serde(rename = "CHANNEL_REQUEST")]
    ChannelRequest(ChannelRequestFrame),
    /// Server acknowledgement of a channel request.
    #[serde(rename = "CHANNEL_OPENED")]
    ChannelOpened(ChannelOpenedFrame),
    /// Client feed configuration (field list, encoding).
    #[serde(rename = "FEED_SETUP")]
    FeedSetup(FeedSetupFrame),
    /// Server acknowledgement of feed configuration.
    #[serde(rename = "FEED_CONFIG")]
    FeedConfig(FeedConfigFrame),
    /// Subscription add/remove.
    #[serde(rename = "FEED_SUBSCRIPTION")]
    FeedSubscription(FeedSubscriptionFrame),
    /// Event payload.
    #[serde(rename = "FEED_DATA")]
    FeedData(FeedDataFrame),
    /// Liveness probe; answered immediately.
    #[serde(rename = "KEEPALIVE")]
    Keepalive(KeepaliveFrame),
    /// Venue-reported error.
    #[serde(rename = "ERROR")]
    Error(ErrorFrame),
    /// Any frame type this client does not understand. Logged and skipped,
    /// never a session abort.
    #[serde(other)]
    Unknown,
}

/// Authorization state reported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorizationState {
    /// Expected on first contact; the client must present a token.
    Unauthorized,
    /// Token accepted; feed channels may be opened.
    Authorized,
}

/// `SETUP` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupFrame {
    /// Always channel 0.
    pub channel: u64,
    /// Protocol version string.
    pub version: String,
    /// Seconds of client silence the server should tolerate.
    pub keepalive_timeout: u64,
    /// Seconds of server silence this client tolerates.
    pub accept_keepalive_timeout: u64,
}

/// `AUTH_STATE` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthStateFrame {
    /// Always channel 0.
    #[serde(default)]
    pub channel: u64,
    /// Current authorization state.
    pub state: AuthorizationState,
}

/// `AUTH` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthFrame {
    /// Always channel 0.
    pub channel: u64,
    /// Bearer token.
    pub token: String,
}

/// Parameters of a `CHANNEL_REQUEST`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelParameters {
    /// Feed contract negotiation mode.
    pub contract: String,
}

/// `CHANNEL_REQUEST` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRequestFrame {
    /// Channel id chosen by the client.
    pub channel: u64,
    /// Requested service, always `FEED`.
    pub service: String,
    /// Negotiation parameters.
    pub parameters: ChannelParameters,
}

/// `CHANNEL_OPENED` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelOpenedFrame {
    /// Channel id being acknowledged.
    pub channel: u64,
    /// Granted service.
    #[serde(default)]
    pub service: String,
}

/// `FEED_SETUP` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSetupFrame {
    /// Target channel.
    pub channel: u64,
    /// Requested aggregation period in seconds.
    pub accept_aggregation_period: f64,
    /// Requested encoding, always `COMPACT`.
    pub accept_data_format: String,
    /// Ordered field list per event type.
    pub accept_event_fields: BTreeMap<String, Vec<String>>,
}

/// `FEED_CONFIG` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedConfigFrame {
    /// Target channel.
    pub channel: u64,
    /// Granted encoding.
    #[serde(default)]
    pub data_format: Option<String>,
    /// Granted aggregation period.
    #[serde(default)]
    pub aggregation_period: Option<f64>,
    /// Granted field list per event type.
    #[serde(default)]
    pub event_fields: Option<BTreeMap<String, Vec<String>>>,
}

/// One entry of a `FEED_SUBSCRIPTION` add/remove list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionEntry {
    /// Event type, e.g. `Candle`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Symbol+interval key, e.g. `AAPL{=1d}`.
    pub symbol: String,
    /// Lower time bound for historical replay, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_time: Option<i64>,
}

/// `FEED_SUBSCRIPTION` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSubscriptionFrame {
    /// Target channel.
    pub channel: u64,
    /// Subscriptions to add.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add: Vec<SubscriptionEntry>,
    /// Subscriptions to remove.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<SubscriptionEntry>,
}

/// `FEED_DATA` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedDataFrame {
    /// Source channel.
    pub channel: u64,
    /// Event tuples: `[eventType, [field...], [field...], ...]`.
    pub data: Vec<serde_json::Value>,
}

/// `KEEPALIVE` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeepaliveFrame {
    /// Originating channel, usually 0.
    #[serde(default)]
    pub channel: u64,
}

/// `ERROR` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorFrame {
    /// Channel the error applies to.
    #[serde(default)]
    pub channel: u64,
    /// Venue error code.
    #[serde(default)]
    pub error: String,
    /// Human-readable description.
    #[serde(default)]
    pub message: String,
}

// =============================================================================
// Candle Decoding
// =============================================================================

/// Decode every Candle event in a `FEED_DATA` payload.
///
/// Each payload element is `[eventType, row, row, ...]`; non-Candle event
/// types and rows with placeholder (non-numeric) prices are skipped. A
/// malformed element never fails the whole payload.
#[must_use]
pub fn decode_candles(data: &[serde_json::Value]) -> Vec<Bar> {
    let mut bars = Vec::new();

    for tuple in data {
        let Some(parts) = tuple.as_array() else {
            tracing::warn!("FEED_DATA element is not an array; skipping");
            continue;
        };
        let Some(event_type) = parts.first().and_then(|v| v.as_str()) else {
            tracing::warn!("FEED_DATA element lacks an event type; skipping");
            continue;
        };
        if event_type != "Candle" {
            tracing::trace!(event_type, "ignoring non-Candle event");
            continue;
        }

        for row in &parts[1..] {
            match row.as_array().and_then(|fields| decode_candle_row(fields)) {
                Some(bar) => bars.push(bar),
                None => tracing::debug!("discarding undecodable candle row"),
            }
        }
    }

    bars
}

/// Decode one positional Candle row into a [`Bar`].
///
/// Field order is fixed by the `FEED_SETUP` this client sent; values are
/// matched by position, never by name.
fn decode_candle_row(fields: &[serde_json::Value]) -> Option<Bar> {
    if fields.len() < CANDLE_EVENT_FIELDS.len() {
        return None;
    }

    let symbol = strip_interval_suffix(fields[0].as_str()?);
    let time = field_as_i64(&fields[FIELD_TIME])?;

    let open = field_as_f64(&fields[FIELD_OPEN])?;
    let high = field_as_f64(&fields[FIELD_OPEN + 1])?;
    let low = field_as_f64(&fields[FIELD_OPEN + 2])?;
    let close = field_as_f64(&fields[FIELD_CLOSE])?;
    // A missing volume does not invalidate the price data.
    let volume = field_as_f64(&fields[FIELD_VOLUME]).unwrap_or(0.0);

    Some(Bar {
        symbol,
        time,
        open,
        high,
        low,
        close,
        volume,
    })
}

/// `AAPL{=1d}` → `AAPL`.
fn strip_interval_suffix(event_symbol: &str) -> String {
    event_symbol
        .split_once('{')
        .map_or(event_symbol, |(symbol, _)| symbol)
        .to_string()
}

/// Numeric field that may arrive as a JSON number or a numeric string.
/// `"NaN"` placeholders yield `None`.
fn field_as_f64(value: &serde_json::Value) -> Option<f64> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

fn field_as_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
