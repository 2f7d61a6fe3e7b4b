//! Fan-out relay between publishers and subscribers.
//!
//! Publishers connect to the ingress listener and send messages whose first
//! frame is the topic. Subscribers connect to the egress listener and send
//! subscription control messages. The relay forwards each published message
//! to every subscriber holding a matching prefix at that moment, and passes
//! subscription changes back to every publisher so they can skip topics
//! nobody listens to. Nothing is stored: a message with no matching
//! subscriber is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::frame::{self, Control, TopicSet};

/// Capacity of each subscriber's outbound queue.
const SUBSCRIBER_QUEUE_CAPACITY: usize = 1024;

/// Shared state for all relay connections.
#[derive(Clone, Default)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

#[derive(Default)]
struct RelayInner {
    /// conn_id -> outbound queue + subscriptions. Lock this before
    /// `publishers` when both are needed.
    subscribers: RwLock<HashMap<Uuid, SubscriberSlot>>,

    /// conn_id -> control queue toward the publisher
    publishers: RwLock<HashMap<Uuid, mpsc::UnboundedSender<Bytes>>>,
}

struct SubscriberSlot {
    tx: mpsc::Sender<Bytes>,
    topics: TopicSet,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve both listeners. Runs until the task is cancelled.
    pub async fn run(self, ingress: TcpListener, egress: TcpListener) {
        let publishers = self.clone();
        tokio::join!(
            publishers.accept_loop(ingress, Role::Publisher),
            self.accept_loop(egress, Role::Subscriber),
        );
    }

    async fn accept_loop(self, listener: TcpListener, role: Role) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    info!("Relay: new {} connection from {}", role, addr);
                    let state = self.clone();
                    tokio::spawn(async move {
                        let result = match role {
                            Role::Publisher => state.handle_publisher(stream).await,
                            Role::Subscriber => state.handle_subscriber(stream).await,
                        };
                        if let Err(e) = result {
                            warn!("Relay {} connection error: {}", role, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Relay {} accept error: {}", role, e);
                }
            }
        }
    }

    async fn handle_publisher(&self, stream: TcpStream) -> anyhow::Result<()> {
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();
        let conn_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

        // Register and replay current subscriptions under the same locks so
        // a subscribe racing with this connect is not lost.
        {
            let subscribers = self.inner.subscribers.read().await;
            let mut publishers = self.inner.publishers.write().await;
            for slot in subscribers.values() {
                for topic in slot.topics.iter() {
                    let _ = tx.send(Control::Subscribe(topic.clone()).encode());
                }
            }
            publishers.insert(conn_id, tx);
        }

        let write_handle = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if writer.write_all(&frame).await.is_err() {
                    break;
                }
            }
        });

        let result = self.publisher_read_loop(&mut reader, conn_id).await;

        write_handle.abort();
        self.inner.publishers.write().await.remove(&conn_id);
        info!("Relay: publisher {} disconnected", conn_id);

        result
    }

    /// Forward every message from one publisher, in the order received.
    async fn publisher_read_loop(&self, reader: &mut OwnedReadHalf, conn_id: Uuid) -> anyhow::Result<()> {
        while let Some(parts) = frame::read_message(reader).await? {
            let delivered = self.forward(&parts).await;
            trace!("Relay: publisher {} message delivered to {} subscribers", conn_id, delivered);
        }
        Ok(())
    }

    /// Queue a message for every subscriber whose prefixes match its topic.
    /// Returns the number of subscribers it was queued for.
    pub async fn forward(&self, parts: &[Bytes]) -> usize {
        let topic = parts.first().map(|t| &t[..]).unwrap_or_default();
        let subscribers = self.inner.subscribers.read().await;

        let mut encoded: Option<Bytes> = None;
        let mut delivered = 0;
        for (conn_id, slot) in subscribers.iter() {
            if !slot.topics.matches(topic) {
                continue;
            }
            let data = encoded.get_or_insert_with(|| frame::encode_message(parts)).clone();
            match slot.tx.try_send(data) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Relay: queue full for subscriber {}, dropping message", conn_id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    async fn handle_subscriber(&self, stream: TcpStream) -> anyhow::Result<()> {
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();
        let conn_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel::<Bytes>(SUBSCRIBER_QUEUE_CAPACITY);

        self.inner.subscribers.write().await.insert(
            conn_id,
            SubscriberSlot {
                tx,
                topics: TopicSet::default(),
            },
        );

        let write_handle = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if writer.write_all(&frame).await.is_err() {
                    break;
                }
            }
        });

        let result = self.subscriber_read_loop(&mut reader, conn_id).await;

        write_handle.abort();
        self.drop_subscriber(conn_id).await;
        info!("Relay: subscriber {} disconnected", conn_id);

        result
    }

    async fn subscriber_read_loop(&self, reader: &mut OwnedReadHalf, conn_id: Uuid) -> anyhow::Result<()> {
        while let Some(parts) = frame::read_message(reader).await? {
            match Control::decode(&parts) {
                Some(control) => self.apply(conn_id, control).await,
                None => warn!("Relay: ignoring non-control message from subscriber {}", conn_id),
            }
        }
        Ok(())
    }

    /// Apply a subscription change and pass it upstream.
    async fn apply(&self, conn_id: Uuid, control: Control) {
        let mut subscribers = self.inner.subscribers.write().await;
        let Some(slot) = subscribers.get_mut(&conn_id) else { return };

        let changed = match &control {
            Control::Subscribe(topic) => {
                slot.topics.add(topic.clone());
                true
            }
            Control::Unsubscribe(topic) => slot.topics.remove(topic),
        };
        if !changed {
            return;
        }

        debug!("Relay: subscriber {} {:?}", conn_id, control);
        self.notify_publishers(&[control]).await;
    }

    async fn drop_subscriber(&self, conn_id: Uuid) {
        let mut subscribers = self.inner.subscribers.write().await;
        let Some(mut slot) = subscribers.remove(&conn_id) else { return };
        let released: Vec<Control> = slot.topics.drain().map(Control::Unsubscribe).collect();
        self.notify_publishers(&released).await;
    }

    async fn notify_publishers(&self, controls: &[Control]) {
        if controls.is_empty() {
            return;
        }
        let publishers = self.inner.publishers.read().await;
        for tx in publishers.values() {
            for control in controls {
                let _ = tx.send(control.encode());
            }
        }
    }

    /// Total subscriptions held across all subscribers.
    pub async fn subscription_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .await
            .values()
            .map(|slot| slot.topics.len())
            .sum()
    }
}

#[derive(Debug, Clone, Copy)]
enum Role {
    Publisher,
    Subscriber,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Publisher => f.write_str("publisher"),
            Self::Subscriber => f.write_str("subscriber"),
        }
    }
}
