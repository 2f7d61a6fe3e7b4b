//! Subscribing side of the relay, for listeners attached to the egress.

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::frame::{self, Control};

pub struct Subscriber {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl Subscriber {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connecting to relay egress {}", addr))?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self { reader, writer })
    }

    /// Receive messages whose topic starts with `prefix`. The empty prefix
    /// receives everything.
    pub async fn subscribe(&mut self, prefix: impl AsRef<[u8]>) -> Result<()> {
        let control = Control::Subscribe(Bytes::copy_from_slice(prefix.as_ref()));
        frame::write_message(&mut self.writer, &control.to_parts()).await?;
        Ok(())
    }

    pub async fn unsubscribe(&mut self, prefix: impl AsRef<[u8]>) -> Result<()> {
        let control = Control::Unsubscribe(Bytes::copy_from_slice(prefix.as_ref()));
        frame::write_message(&mut self.writer, &control.to_parts()).await?;
        Ok(())
    }

    /// Next delivered message, `None` once the relay closes the connection.
    pub async fn recv(&mut self) -> Result<Option<Vec<Bytes>>> {
        Ok(frame::read_message(&mut self.reader).await?)
    }
}
