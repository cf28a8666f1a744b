use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

/// Key under which an unparseable payload is delivered.
pub const RAW_FIELD: &str = "raw";

/// Inbound message handed to the owning endpoint's handler.
///
/// The payload is always a structured value: valid JSON is delivered as-is,
/// anything else is wrapped as `{"raw": "<text>"}` so that a message is never
/// dropped just because it failed to parse.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: Value,
    pub received_at: DateTime<Local>,
    raw: String,
}

impl Message {
    pub fn from_publish(topic: impl Into<String>, bytes: &[u8]) -> Self {
        let raw = String::from_utf8_lossy(bytes).into_owned();
        let payload = serde_json::from_str::<Value>(&raw).unwrap_or_else(|_| json!({ RAW_FIELD: raw }));

        Message {
            topic: topic.into(),
            payload,
            received_at: Local::now(),
            raw,
        }
    }

    /// The payload exactly as received, decoded lossily as UTF-8.
    pub fn text(&self) -> &str {
        &self.raw
    }

    /// True when the payload was not valid JSON and got wrapped.
    pub fn is_fallback(&self) -> bool {
        match &self.payload {
            Value::Object(map) => {
                map.len() == 1
                    && map.get(RAW_FIELD).and_then(Value::as_str) == Some(self.raw.as_str())
            }
            _ => false,
        }
    }

    /// Numeric field lookup that never fails: missing, malformed or
    /// non-finite values read as `0.0`.
    pub fn number_field(&self, key: &str) -> f64 {
        let value = match self.payload.get(key) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        value.filter(|v| v.is_finite()).unwrap_or(0.0)
    }

    pub fn text_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preview: String = self.raw.chars().take(40).collect();
        write!(
            f,
            "{} {} - {}",
            self.received_at.format("%H:%M:%S"),
            self.topic,
            preview
        )
    }
}

/// Outbound payload. Structured values are sent in their JSON encoding,
/// text tokens verbatim.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Text(String),
    Structured(Value),
}

impl Payload {
    pub fn text(token: impl Into<String>) -> Self {
        Payload::Text(token.into())
    }

    pub fn structured<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Payload::Structured(serde_json::to_value(value)?))
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Payload::Text(text) => text.as_bytes().to_vec(),
            Payload::Structured(value) => value.to_string().into_bytes(),
        }
    }
}

impl From<&str> for Payload {
    fn from(token: &str) -> Self {
        Payload::Text(token.to_string())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Structured(value)
    }
}

/// Callback invoked from the gateway's network task for every inbound message.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Wraps any closure into a [`MessageHandler`].
pub fn handler<F>(f: F) -> MessageHandler
where
    F: Fn(Message) + Send + Sync + 'static,
{
    Arc::new(f)
}
