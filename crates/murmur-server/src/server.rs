//! Command endpoint: many connections, one handler.
//!
//! Every connection forwards its requests into a single queue. One blocking
//! thread drains it, so requests from all clients run one at a time to
//! completion against the same on-disk state. Each connection waits for the
//! reply to its current request before reading the next one.

use anyhow::{Context, Result, anyhow};
use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use murmur_relay::frame;

use crate::handler::CommandServer;

/// Requests allowed to wait for the handler at once.
const QUEUE_CAPACITY: usize = 256;

struct Job {
    parts: Vec<Bytes>,
    reply: oneshot::Sender<Vec<u8>>,
}

/// Accept connections on `listener` until the task is cancelled or the
/// handler thread stops.
pub async fn serve(listener: TcpListener, server: CommandServer) -> Result<()> {
    let (jobs, rx) = mpsc::channel::<Job>(QUEUE_CAPACITY);
    let mut worker = tokio::task::spawn_blocking(move || run_handler(server, rx));

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!("Command connection from {}", addr);
                    let jobs = jobs.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, jobs).await {
                            warn!("Command connection {} error: {:#}", addr, e);
                        }
                        info!("Command connection {} closed", addr);
                    });
                }
                Err(e) => error!("Command accept error: {}", e),
            },
            joined = &mut worker => {
                joined.context("command handler panicked")?;
                return Err(anyhow!("command handler stopped"));
            }
        }
    }
}

fn run_handler(mut server: CommandServer, mut rx: mpsc::Receiver<Job>) {
    while let Some(job) = rx.blocking_recv() {
        match server.handle_raw(&job.parts) {
            Ok(reply) => {
                let _ = job.reply.send(reply);
            }
            // Dropping the reply sender closes that client's connection.
            Err(e) => error!("Cannot encode reply: {:#}", e),
        }
    }
}

async fn handle_connection(stream: TcpStream, jobs: mpsc::Sender<Job>) -> Result<()> {
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();

    while let Some(parts) = frame::read_message(&mut reader).await? {
        let (reply_tx, reply_rx) = oneshot::channel();
        jobs.send(Job {
            parts,
            reply: reply_tx,
        })
        .await
        .map_err(|_| anyhow!("command handler stopped"))?;

        let reply = reply_rx.await.context("request produced no reply")?;
        frame::write_message(&mut writer, &[Bytes::from(reply)]).await?;
    }
    Ok(())
}
