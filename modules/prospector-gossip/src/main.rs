use anyhow::Result;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use prospector_common::Config;
use prospector_gossip::GossipService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("prospector=info".parse()?))
        .init();

    info!("Prospector gossip starting...");

    let config = Config::gossip_from_env()?;
    config.log_redacted();

    let service = GossipService::bind(&config).await?;

    // Stop on ctrl-c
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    service.run(shutdown_rx).await?;
    Ok(())
}
