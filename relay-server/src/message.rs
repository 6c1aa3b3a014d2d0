use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Frames sent from the relay to a client.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    Connected,
    Event { channel: Arc<str>, payload: Arc<Value> },
    Error { reason: String },
}

impl OutboundMessage {
    pub fn error(reason: impl Into<String>) -> Self {
        OutboundMessage::Error {
            reason: reason.into(),
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Frames a client may send once connected.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
}
