//! Message framing shared by every murmur TCP endpoint.
//!
//! ```text
//! [len(4 bytes BE)][flags(1)][body...]
//! ```
//!
//! `len` counts the flags byte plus the body. Flag `0x01` (MORE) means
//! another frame of the same message follows, so a message is a run of
//! frames ending with one whose MORE bit is clear.
//!
//! Subscription control messages are a single frame whose body is
//! `0x01 <prefix>` (subscribe) or `0x00 <prefix>` (unsubscribe).

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (16 MB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Maximum number of frames in one message.
pub const MAX_PARTS: usize = 64;

/// Maximum total body size of one message, across all its frames.
pub const MAX_MESSAGE_SIZE: usize = MAX_FRAME_SIZE;

const FLAG_MORE: u8 = 0x01;

const CONTROL_SUBSCRIBE: u8 = 0x01;
const CONTROL_UNSUBSCRIBE: u8 = 0x00;

/// Read one message. Returns `None` on a clean disconnect between messages.
pub async fn read_message<R>(reader: &mut R) -> io::Result<Option<Vec<Bytes>>>
where
    R: AsyncRead + Unpin,
{
    let mut parts = Vec::new();
    let mut total = 0usize;
    loop {
        let frame_len = match reader.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && parts.is_empty() => {
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if frame_len == 0 || frame_len > MAX_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid frame length {}", frame_len),
            ));
        }

        total += frame_len - 1;
        if total > MAX_MESSAGE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("message exceeds {} bytes", MAX_MESSAGE_SIZE),
            ));
        }

        let flags = reader.read_u8().await?;
        let mut body = vec![0u8; frame_len - 1];
        reader.read_exact(&mut body).await?;
        parts.push(Bytes::from(body));

        if flags & FLAG_MORE == 0 {
            return Ok(Some(parts));
        }
        if parts.len() >= MAX_PARTS {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("message exceeds {} frames", MAX_PARTS),
            ));
        }
    }
}

/// Encode a message into a single buffer ready to be written.
pub fn encode_message(parts: &[Bytes]) -> Bytes {
    if parts.is_empty() {
        return encode_message(&[Bytes::new()]);
    }

    let total: usize = parts.iter().map(|p| 5 + p.len()).sum();
    let mut buf = BytesMut::with_capacity(total);
    for (i, part) in parts.iter().enumerate() {
        let more = i + 1 < parts.len();
        buf.put_u32((part.len() + 1) as u32);
        buf.put_u8(if more { FLAG_MORE } else { 0 });
        buf.put_slice(part);
    }
    buf.freeze()
}

/// Write one message with a single `write_all`.
pub async fn write_message<W>(writer: &mut W, parts: &[Bytes]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_message(parts)).await
}

/// Subscription change travelling from subscribers toward publishers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    Subscribe(Bytes),
    Unsubscribe(Bytes),
}

impl Control {
    pub fn decode(parts: &[Bytes]) -> Option<Self> {
        let [frame] = parts else { return None };
        let (&kind, _) = frame.split_first()?;
        let prefix = frame.slice(1..);
        match kind {
            CONTROL_SUBSCRIBE => Some(Self::Subscribe(prefix)),
            CONTROL_UNSUBSCRIBE => Some(Self::Unsubscribe(prefix)),
            _ => None,
        }
    }

    pub fn to_parts(&self) -> Vec<Bytes> {
        let (kind, prefix) = match self {
            Self::Subscribe(p) => (CONTROL_SUBSCRIBE, p),
            Self::Unsubscribe(p) => (CONTROL_UNSUBSCRIBE, p),
        };
        let mut buf = BytesMut::with_capacity(prefix.len() + 1);
        buf.put_u8(kind);
        buf.put_slice(prefix);
        vec![buf.freeze()]
    }

    pub fn encode(&self) -> Bytes {
        encode_message(&self.to_parts())
    }
}

/// Counted set of subscription prefixes. Subscribing twice to the same
/// prefix takes two unsubscribes to clear it.
#[derive(Debug, Clone, Default)]
pub struct TopicSet {
    prefixes: Vec<Bytes>,
}

impl TopicSet {
    pub fn add(&mut self, prefix: Bytes) {
        self.prefixes.push(prefix);
    }

    /// Remove one occurrence. Returns false if the prefix was not held.
    pub fn remove(&mut self, prefix: &[u8]) -> bool {
        match self.prefixes.iter().position(|p| &p[..] == prefix) {
            Some(i) => {
                self.prefixes.swap_remove(i);
                true
            }
            None => false,
        }
    }

    /// Whether any held prefix matches the start of `topic`. The empty
    /// prefix matches everything.
    pub fn matches(&self, topic: &[u8]) -> bool {
        self.prefixes.iter().any(|p| topic.starts_with(p))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bytes> {
        self.prefixes.iter()
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn clear(&mut self) {
        self.prefixes.clear();
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Bytes> + '_ {
        self.prefixes.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn multipart_message_survives_the_wire() {
        let parts = vec![Bytes::from_static(b"geral"), Bytes::from_static(b"\x83payload")];
        let encoded = encode_message(&parts);

        let mut reader = &encoded[..];
        let back = read_message(&mut reader).await.unwrap();
        assert_eq!(back, Some(parts));
        assert_eq!(read_message(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn truncated_message_is_an_error() {
        let encoded = encode_message(&[Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        let mut reader = &encoded[..encoded.len() - 3];
        assert!(read_message(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn zero_length_frame_is_rejected() {
        let mut reader = &[0u8, 0, 0, 0][..];
        let err = read_message(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn oversized_message_is_rejected_before_buffering() {
        // A small first frame, then a header announcing a body that would push
        // the message past the limit. No body follows.
        let mut wire = encode_message(&[Bytes::from_static(b"topic"), Bytes::new()]).to_vec();
        wire.truncate(4 + 1 + 5);
        wire.extend_from_slice(&(MAX_FRAME_SIZE as u32).to_be_bytes());

        let mut reader = &wire[..];
        let err = read_message(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn control_frames() {
        let sub = Control::Subscribe(Bytes::from_static(b"geral"));
        assert_eq!(Control::decode(&sub.to_parts()), Some(sub));

        let all = Control::Unsubscribe(Bytes::new());
        assert_eq!(Control::decode(&all.to_parts()), Some(all));

        assert_eq!(Control::decode(&[Bytes::from_static(b"\x07x")]), None);
        assert_eq!(Control::decode(&[Bytes::new()]), None);
        assert_eq!(
            Control::decode(&[Bytes::from_static(b"\x01a"), Bytes::from_static(b"b")]),
            None
        );
    }

    #[test]
    fn topic_set_is_counted_and_prefix_matched() {
        let mut set = TopicSet::default();
        set.add(Bytes::from_static(b"ger"));
        set.add(Bytes::from_static(b"ger"));

        assert!(set.matches(b"geral"));
        assert!(!set.matches(b"games"));

        assert!(set.remove(b"ger"));
        assert!(set.matches(b"geral"));
        assert!(set.remove(b"ger"));
        assert!(!set.matches(b"geral"));
        assert!(!set.remove(b"ger"));
        assert!(set.is_empty());

        set.add(Bytes::new());
        assert!(set.matches(b"anything"));
    }
}
