// WebSocket message envelope for the murmur relay protocol.
//
// Every frame in either direction is a JSON object of the form
// `{"type": "<kind>", "data": <any>}`. Known kinds are typed; anything
// else round-trips through `MessageKind::Other`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload carried by server-emitted pong frames.
pub const PONG_DATA: &str = "pong";
/// Largest frame the relay accepts from a client, in bytes.
pub const MAX_FRAME_BYTES: usize = 512;

/// The `type` tag of a message envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    /// Client -> Server: application-level liveness check.
    Ping,
    /// Server -> Client: reply to a `ping`.
    Pong,
    /// Bidirectional: fan-out to every connected client.
    Broadcast,
    /// Any tag the relay does not interpret.
    Other(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Broadcast => "broadcast",
            Self::Other(tag) => tag,
        }
    }
}

impl From<String> for MessageKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "broadcast" => Self::Broadcast,
            _ => Self::Other(tag),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Other(tag) => tag,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Opaque payload. Absent on the wire decodes as `null`.
    #[serde(default)]
    pub data: Value,
}

impl Message {
    pub fn new(kind: MessageKind, data: impl Into<Value>) -> Self {
        Self { kind, data: data.into() }
    }

    pub fn ping() -> Self {
        Self::new(MessageKind::Ping, "ping")
    }

    pub fn pong() -> Self {
        Self::new(MessageKind::Pong, PONG_DATA)
    }

    pub fn broadcast(data: impl Into<Value>) -> Self {
        Self::new(MessageKind::Broadcast, data)
    }

    /// Builds the broadcast a relay fans out on behalf of `sender`.
    ///
    /// String payloads are embedded verbatim; any other JSON value is
    /// embedded as its compact JSON text.
    pub fn attributed_broadcast(sender: &str, data: &Value) -> Self {
        let body = match data {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        Self::broadcast(format!("{sender}: {body}"))
    }
}

pub fn decode_message(raw: &[u8]) -> Result<Message, serde_json::Error> {
    serde_json::from_slice::<Message>(raw)
}

pub fn encode_message(message: &Message) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}
