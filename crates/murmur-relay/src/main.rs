use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use murmur_relay::Relay;
use murmur_relay::shutdown::shutdown_signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur_relay=info".into()),
        )
        .init();

    // Config
    let ingress_addr =
        std::env::var("MURMUR_RELAY_INGRESS").unwrap_or_else(|_| "0.0.0.0:5557".into());
    let egress_addr =
        std::env::var("MURMUR_RELAY_EGRESS").unwrap_or_else(|_| "0.0.0.0:5558".into());

    // Both endpoints must bind or the relay is useless
    let ingress = TcpListener::bind(&ingress_addr)
        .await
        .with_context(|| format!("binding relay ingress {}", ingress_addr))?;
    let egress = TcpListener::bind(&egress_addr)
        .await
        .with_context(|| format!("binding relay egress {}", egress_addr))?;

    info!("Relay running (ingress {} <-> egress {})", ingress_addr, egress_addr);

    tokio::select! {
        _ = Relay::new().run(ingress, egress) => {}
        _ = shutdown_signal() => {}
    }

    Ok(())
}
