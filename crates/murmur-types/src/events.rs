use serde::{Deserialize, Serialize};

use crate::models::{Message, MessageKind};

/// Sender label prefix used in text frames for private messages. Existing
/// subscribers match on it, so it stays as-is.
pub const PRIVATE_LABEL_PREFIX: &str = "Privado de";

/// Event published on the fan-out bus after a message is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Broadcast {
    /// A channel message, routed by channel name.
    Public {
        from: String,
        channel: String,
        message: String,
    },

    /// A private message, routed by recipient id.
    Private {
        from: String,
        to: String,
        message: String,
    },
}

impl Broadcast {
    pub fn from_message(msg: &Message) -> Self {
        match msg.kind {
            MessageKind::Public => Self::Public {
                from: msg.from.clone(),
                channel: msg.to.clone(),
                message: msg.text.clone(),
            },
            MessageKind::Private => Self::Private {
                from: msg.from.clone(),
                to: msg.to.clone(),
                message: msg.text.clone(),
            },
        }
    }

    /// Routing topic: the channel for public messages, the recipient for
    /// private ones.
    pub fn topic(&self) -> &str {
        match self {
            Self::Public { channel, .. } => channel,
            Self::Private { to, .. } => to,
        }
    }

    /// Single-frame text rendering: `"<topic> [<sender-label>]: <text>"`.
    pub fn to_text_frame(&self) -> String {
        match self {
            Self::Public {
                from,
                channel,
                message,
            } => format!("{} [{}]: {}", channel, from, message),
            Self::Private { from, to, message } => {
                format!("{} [{} {}]: {}", to, PRIVATE_LABEL_PREFIX, from, message)
            }
        }
    }

    /// MessagePack payload for the two-part (topic, payload) rendering.
    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}
