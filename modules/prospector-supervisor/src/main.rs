use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use prospector_common::{Backoff, Config, QueueName, StorageMode};
use prospector_queue::{CommandQueue, DurableQueue, LeaseTimings, ObjectQueue, SqsCommandQueue};
use prospector_supervisor::{BrowserProvider, ExclusionList, QueueMap, Supervisor, WorkerDeps};
use prospector_wal::{DirectoryRegistry, WalJournal};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("prospector=info".parse()?))
        .init();

    info!("Prospector supervisor starting...");

    // Load config
    let config = Config::supervisor_from_env()?;
    config.log_redacted();

    let timings = LeaseTimings::default();
    timings.validate()?;

    let store = prospector_storage::from_config(&config).context("opening shared storage")?;

    let queues: QueueMap = QueueName::ALL
        .into_iter()
        .map(|q| {
            let queue: Arc<dyn DurableQueue> = Arc::new(ObjectQueue::new(
                store.clone(),
                &config.campaign,
                q,
                &config.node_id,
                timings.lease_duration,
            ));
            (q, queue)
        })
        .collect();

    // Remote commands are optional
    let commands: Option<Arc<dyn CommandQueue>> = match &config.command_queue_url {
        Some(url) => {
            let region = match &config.storage {
                StorageMode::S3 { region, .. } => region.clone(),
                StorageMode::Local => {
                    std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string())
                }
            };
            info!("Command queue enabled");
            Some(Arc::new(SqsCommandQueue::new(url, &region)?))
        }
        None => {
            info!("No PROSPECTOR_COMMAND_QUEUE_URL set, remote commands disabled");
            None
        }
    };

    let exclusions = match ExclusionList::load(store.as_ref(), &config.campaign).await {
        Ok(list) => list,
        Err(e) => {
            warn!(error = %e, "Could not load exclusions, starting with none");
            ExclusionList::new()
        }
    };

    let deps = WorkerDeps {
        queues: Arc::new(queues),
        store: store.clone(),
        journal: Arc::new(WalJournal::new(&config.data_root, &config.node_id)),
        registry: Arc::new(DirectoryRegistry::new(&config.data_root)),
        exclusions: Arc::new(exclusions),
        timings,
        backoff: Backoff::default(),
        idle_sleep: Duration::from_secs(5),
    };
    let provider = Arc::new(BrowserProvider::new(
        &config.browserless_url,
        config.browserless_token.as_deref(),
        &config.campaign,
    ));

    // Stop on ctrl-c
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    let supervisor = Supervisor::new(&config, store, provider, commands, deps);
    let stats = supervisor.run(shutdown_rx).await?;

    info!("Supervisor complete. {stats}");
    Ok(())
}
