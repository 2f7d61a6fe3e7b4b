//! Emitting appended messages onto the relay.

use anyhow::{Context, Result};
use bytes::Bytes;
use tracing::debug;

use murmur_relay::{Delivery, Publisher};
use murmur_types::events::Broadcast;

use crate::config::BroadcastStyle;

/// Where broadcast events go. Sending never blocks and never fails the
/// command: delivery to listeners is best effort.
pub trait BroadcastSink: Send {
    fn send(&self, parts: Vec<Bytes>);
}

impl BroadcastSink for Publisher {
    fn send(&self, parts: Vec<Bytes>) {
        match self.publish(parts) {
            Delivery::Queued => {}
            outcome => debug!("Broadcast not sent: {:?}", outcome),
        }
    }
}

/// Frames of one event in the given style. The first frame always starts
/// with the topic so prefix subscriptions select it.
pub fn encode(style: BroadcastStyle, event: &Broadcast) -> Result<Vec<Bytes>> {
    match style {
        BroadcastStyle::Text => Ok(vec![Bytes::from(event.to_text_frame())]),
        BroadcastStyle::Tagged => {
            let payload = event.to_msgpack().context("encoding broadcast payload")?;
            Ok(vec![
                Bytes::copy_from_slice(event.topic().as_bytes()),
                Bytes::from(payload),
            ])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn public() -> Broadcast {
        Broadcast::Public {
            from: "alice".into(),
            channel: "geral".into(),
            message: "oi".into(),
        }
    }

    #[test]
    fn text_is_one_frame() {
        let parts = encode(BroadcastStyle::Text, &public()).unwrap();
        assert_eq!(parts, vec![Bytes::from_static(b"geral [alice]: oi")]);
    }

    #[test]
    fn tagged_is_topic_then_payload() {
        let parts = encode(BroadcastStyle::Tagged, &public()).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(&parts[0][..], b"geral");
        assert_eq!(Broadcast::from_msgpack(&parts[1]).unwrap(), public());
    }
}
