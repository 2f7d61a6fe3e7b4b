//! Publishing side of the relay: the connection a producer keeps open to the
//! relay ingress.
//!
//! The relay reports every subscription change back to its publishers. A
//! `Publisher` keeps that set locally and drops messages nobody subscribes
//! to before they reach the socket. Delivery is at-most-once: while the
//! relay is unreachable the subscription set is empty, so every publish is
//! dropped until the connection is re-established.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::frame::{self, Control, TopicSet};

/// Capacity of the outbound queue between `publish` and the socket.
const QUEUE_CAPACITY: usize = 1024;

/// Delay between reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Outcome of a single publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the connection for sending.
    Queued,
    /// No subscriber matches the topic; dropped.
    NoSubscribers,
    /// The outbound queue is full or the connection task is gone; dropped.
    Dropped,
}

/// Handle to a background connection to the relay ingress. Cheap to clone.
#[derive(Clone)]
pub struct Publisher {
    tx: mpsc::Sender<Bytes>,
    subscriptions: Arc<RwLock<TopicSet>>,
}

impl Publisher {
    /// Start connecting to `addr` in the background. Must be called from
    /// within a tokio runtime.
    pub fn connect(addr: impl Into<String>) -> Self {
        let addr = addr.into();
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let subscriptions = Arc::new(RwLock::new(TopicSet::default()));

        tokio::spawn(run_connection(addr, rx, subscriptions.clone()));

        Self { tx, subscriptions }
    }

    /// Publish a message whose first part is the topic. Never blocks.
    pub fn publish(&self, parts: Vec<Bytes>) -> Delivery {
        let topic = parts.first().map(|t| &t[..]).unwrap_or_default();
        if !self.has_subscribers(topic) {
            trace!("Publisher: no subscribers for {:?}, dropping", String::from_utf8_lossy(topic));
            return Delivery::NoSubscribers;
        }

        match self.tx.try_send(frame::encode_message(&parts)) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Publisher: outbound queue full, dropping message");
                Delivery::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Dropped,
        }
    }

    /// Whether the relay currently reports a subscription matching `topic`.
    pub fn has_subscribers(&self, topic: &[u8]) -> bool {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .matches(topic)
    }
}

/// Connect, serve, reconnect. Ends when every `Publisher` handle is dropped.
async fn run_connection(
    addr: String,
    mut rx: mpsc::Receiver<Bytes>,
    subscriptions: Arc<RwLock<TopicSet>>,
) {
    let mut reported_failure = false;
    loop {
        let stream = match TcpStream::connect(&addr).await {
            Ok(stream) => stream,
            Err(e) => {
                if !reported_failure {
                    warn!("Publisher: cannot reach relay at {}: {} (retrying)", addr, e);
                    reported_failure = true;
                }
                if rx.is_closed() {
                    return;
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };
        reported_failure = false;
        info!("Publisher: connected to relay at {}", addr);

        // Messages queued before this connection existed are stale.
        while rx.try_recv().is_ok() {}

        let _ = stream.set_nodelay(true);
        let (reader, mut writer) = stream.into_split();
        let mut read_handle = tokio::spawn(read_controls(reader, subscriptions.clone()));

        let finished = loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(data) = msg else { break true };
                    if let Err(e) = writer.write_all(&data).await {
                        warn!("Publisher: send to relay failed: {}", e);
                        break false;
                    }
                }
                _ = &mut read_handle => break false,
            }
        };

        read_handle.abort();
        subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();

        if finished {
            debug!("Publisher: all handles dropped, closing relay connection");
            return;
        }
        warn!("Publisher: lost connection to relay at {}", addr);
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// Track subscription changes sent back by the relay until it disconnects.
async fn read_controls(mut reader: OwnedReadHalf, subscriptions: Arc<RwLock<TopicSet>>) {
    loop {
        let parts = match frame::read_message(&mut reader).await {
            Ok(Some(parts)) => parts,
            Ok(None) => return,
            Err(e) => {
                warn!("Publisher: bad frame from relay: {}", e);
                return;
            }
        };

        let mut subs = subscriptions.write().unwrap_or_else(|e| e.into_inner());
        match Control::decode(&parts) {
            Some(Control::Subscribe(topic)) => subs.add(topic),
            Some(Control::Unsubscribe(topic)) => {
                subs.remove(&topic);
            }
            None => warn!("Publisher: unexpected message from relay"),
        }
    }
}
