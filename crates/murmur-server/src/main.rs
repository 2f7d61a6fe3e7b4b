use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use murmur_relay::Publisher;
use murmur_relay::shutdown::shutdown_signal;
use murmur_server::{CommandServer, ServerConfig, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur_server=debug,murmur_relay=info,murmur_store=info".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // Broadcasts go to the relay ingress; the publisher reconnects on its own
    let publisher = Publisher::connect(config.publish_addr.clone());
    let command = CommandServer::open(config.clone(), Box::new(publisher))?;

    if let Err(e) = command.rebuild_summary() {
        warn!("Initial summary rebuild failed: {:#}", e);
    }

    let listener = TcpListener::bind(&config.command_addr)
        .await
        .with_context(|| format!("binding command endpoint {}", config.command_addr))?;

    info!(
        "murmur server listening on {} (data {}, codec {}, broadcast {} -> {})",
        config.command_addr,
        config.data_dir.display(),
        config.codec,
        config.broadcast,
        config.publish_addr
    );

    tokio::select! {
        result = server::serve(listener, command) => result?,
        _ = shutdown_signal() => {}
    }

    Ok(())
}
