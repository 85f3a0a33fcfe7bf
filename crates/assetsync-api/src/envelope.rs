//! The wire unit exchanged over the push channel.
//!
//! Every frame in both directions is a JSON object tagged by `type`:
//!
//! ```json
//! { "type": "dashboard_update", "payload": { "totalAssets": 42 }, "timestamp": 1760000000000 }
//! { "type": "subscribe", "channels": ["alerts"] }
//! ```
//!
//! Unknown types are preserved verbatim in [`MessageKind::Other`] so nothing
//! the server sends is silently rejected at this layer.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Longest slice of a rejected frame kept for diagnostics.
const MAX_ERROR_BODY: usize = 256;

// ── MessageKind ──────────────────────────────────────────────────────

/// Classification of an envelope's `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    // Control plane
    Ping,
    Pong,
    Subscribe,
    Unsubscribe,
    // Domain events
    DashboardUpdate,
    AssetStatusChange,
    RequestStatusChange,
    AlertNew,
    AlertResolved,
    /// Anything the client does not recognize.
    Other(String),
}

impl MessageKind {
    /// Every domain event type the client recognizes, in wire form.
    pub const DOMAIN_TYPES: [&'static str; 5] = [
        "dashboard_update",
        "asset_status_change",
        "request_status_change",
        "alert_new",
        "alert_resolved",
    ];

    pub fn from_type(kind: &str) -> Self {
        match kind {
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "subscribe" => Self::Subscribe,
            "unsubscribe" => Self::Unsubscribe,
            "dashboard_update" => Self::DashboardUpdate,
            "asset_status_change" => Self::AssetStatusChange,
            "request_status_change" => Self::RequestStatusChange,
            "alert_new" => Self::AlertNew,
            "alert_resolved" => Self::AlertResolved,
            other => Self::Other(other.to_owned()),
        }
    }

    /// The wire form of this kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::DashboardUpdate => "dashboard_update",
            Self::AssetStatusChange => "asset_status_change",
            Self::RequestStatusChange => "request_status_change",
            Self::AlertNew => "alert_new",
            Self::AlertResolved => "alert_resolved",
            Self::Other(kind) => kind,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Self::Ping | Self::Pong | Self::Subscribe | Self::Unsubscribe
        )
    }

    pub fn is_domain(&self) -> bool {
        !self.is_control() && !matches!(self, Self::Other(_))
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Envelope ─────────────────────────────────────────────────────────

/// A single message on the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type, e.g. `"ping"`, `"alert_new"`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Event body. `null` and absent are both `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Sender clock in milliseconds since the Unix epoch.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_timestamp"
    )]
    pub timestamp: Option<i64>,

    /// Channel list carried by `subscribe` / `unsubscribe` control messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,
}

impl Envelope {
    /// Build a domain envelope stamped with the current time.
    pub fn new(kind: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            kind: kind.into(),
            payload,
            timestamp: Some(now_millis()),
            channels: None,
        }
    }

    pub fn ping(timestamp: i64) -> Self {
        Self {
            kind: "ping".into(),
            payload: None,
            timestamp: Some(timestamp),
            channels: None,
        }
    }

    pub fn pong(timestamp: i64) -> Self {
        Self {
            kind: "pong".into(),
            payload: None,
            timestamp: Some(timestamp),
            channels: None,
        }
    }

    pub fn subscribe<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: "subscribe".into(),
            payload: None,
            timestamp: None,
            channels: Some(channels.into_iter().map(Into::into).collect()),
        }
    }

    pub fn unsubscribe<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: "unsubscribe".into(),
            payload: None,
            timestamp: None,
            channels: Some(channels.into_iter().map(Into::into).collect()),
        }
    }

    /// Classify the `type` field.
    pub fn message_kind(&self) -> MessageKind {
        MessageKind::from_type(&self.kind)
    }

    /// Parse a text frame. Anything that is not a JSON object with a
    /// string `type` and an object or null `payload` is a
    /// [`Error::Protocol`].
    pub fn parse(text: &str) -> Result<Self, Error> {
        let protocol = |message: String| Error::Protocol {
            message,
            body: truncate(text, MAX_ERROR_BODY).to_owned(),
        };

        let value: Value = serde_json::from_str(text).map_err(|e| protocol(e.to_string()))?;
        let Value::Object(fields) = &value else {
            return Err(protocol(format!("expected a JSON object, got {}", json_kind(&value))));
        };
        match fields.get("payload") {
            None | Some(Value::Null | Value::Object(_)) => {}
            Some(other) => {
                return Err(protocol(format!(
                    "expected an object payload, got {}",
                    json_kind(other)
                )));
            }
        }
        serde_json::from_value(value).map_err(|e| protocol(e.to_string()))
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Milliseconds since the Unix epoch, as stamped on outbound envelopes.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Accept integer or floating-point timestamps; browsers and some servers
/// emit `Date.now()` as a float.
#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

// ── Tests ────────────────────────────────────────────────────────────
