//! Wire Protocol
//!
//! Defines the message format exchanged between the broker and its clients.
//! Every frame is UTF-8 JSON text of the shape
//! `{"type": ..., "data": ..., "timestamp": ...}` where `type` selects the
//! payload variant and `timestamp` is producer-assigned milliseconds since
//! epoch.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed set of message types carried over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Weather,
    CropAlert,
    SystemNotification,
}

impl MessageKind {
    /// The wire tag for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Weather => "weather",
            MessageKind::CropAlert => "crop_alert",
            MessageKind::SystemNotification => "system_notification",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed payload, one variant per known message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Weather(WeatherUpdate),
    CropAlert(CropAlert),
    SystemNotification(SystemNotification),
}

impl Payload {
    /// The kind tag of this payload.
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::Weather(_) => MessageKind::Weather,
            Payload::CropAlert(_) => MessageKind::CropAlert,
            Payload::SystemNotification(_) => MessageKind::SystemNotification,
        }
    }
}

/// Current field readings pushed to dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherUpdate {
    /// Air temperature in degrees Celsius
    pub temperature: f64,
    /// Relative humidity in percent
    pub humidity: f64,
    /// Rainfall in millimetres since the last update
    pub rainfall: f64,
    /// Wind speed in km/h
    pub wind_speed: f64,
    /// Short human-readable forecast
    pub forecast: String,
}

/// Alert raised against a crop, e.g. by an analysis pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropAlert {
    pub crop_type: String,
    pub severity: AlertSeverity,
    #[serde(default)]
    pub detected_issues: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// How urgent a crop alert is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Minor,
    Attention,
    Critical,
}

/// Operational notice from the broker itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemNotification {
    pub message: String,
}

/// One wire message: a typed payload plus its producer-assigned timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    #[serde(flatten)]
    pub payload: Payload,
    /// Milliseconds since epoch, assigned by the producer
    pub timestamp: i64,
}

impl Message {
    /// Construct a message stamped with the current time.
    pub fn now(payload: Payload) -> Self {
        Self {
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Construct a message with an explicit timestamp.
    pub fn with_timestamp(payload: Payload, timestamp: i64) -> Self {
        Self { payload, timestamp }
    }

    /// The kind tag of the carried payload.
    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }
}

/// Raw envelope used for the first decoding stage, before the type tag is
/// matched against the known set.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    data: serde_json::Value,
    timestamp: i64,
}

/// Serialize a message to its wire form.
pub fn encode(message: &Message) -> String {
    // Message serialization cannot fail: all payload fields are plain data.
    serde_json::to_string(message).expect("message serialization is infallible")
}

/// Parse a text frame into a message.
///
/// Decoding is two-stage so malformed input and unknown tags are reported
/// distinctly: the envelope (`type`, `data`, `timestamp`) must parse, then
/// the tag must name a known kind, then the payload must match that kind's
/// shape.
pub fn decode(text: &str) -> Result<Message, ProtocolError> {
    let raw: RawEnvelope =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let payload = match raw.kind.as_str() {
        "weather" => Payload::Weather(
            serde_json::from_value(raw.data).map_err(|e| ProtocolError::Malformed(e.to_string()))?,
        ),
        "crop_alert" => Payload::CropAlert(
            serde_json::from_value(raw.data).map_err(|e| ProtocolError::Malformed(e.to_string()))?,
        ),
        "system_notification" => Payload::SystemNotification(
            serde_json::from_value(raw.data).map_err(|e| ProtocolError::Malformed(e.to_string()))?,
        ),
        other => return Err(ProtocolError::UnknownType(other.to_string())),
    };

    Ok(Message {
        payload,
        timestamp: raw.timestamp,
    })
}

/// Errors produced while decoding a frame
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unknown message type: {0}")]
    UnknownType(String),
}
