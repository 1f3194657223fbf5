use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use prospector_common::{Config, QueueName, StorageMode};
use prospector_queue::CommandQueue;
use prospector_storage::Storage;

use crate::campaign::{CampaignConfig, NodeScaling};
use crate::commands::{CommandProcessor, CommandSummary};
use crate::executor::{ContextProvider, TaskExecutor};
use crate::liveness::{self, read_system_stats, StatusDocument};
use crate::pool::WorkerPool;
use crate::sync::{write_report, IndexSync};
use crate::worker::{LoopExit, WorkerDeps};

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub tick_interval: Duration,
    pub liveness_interval: Duration,
    pub sync_interval: Duration,
    /// Age after which the execution context is replaced.
    pub context_refresh: Duration,
    /// Mirror local index files to the shared store. Pointless when the
    /// shared store is the local disk.
    pub sync_indexes: bool,
}

impl SupervisorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick_interval: config.tick_interval.max(Duration::from_secs(1)),
            liveness_interval: Duration::from_secs(60),
            sync_interval: Duration::from_secs(300),
            context_refresh: Duration::from_secs(30 * 60),
            sync_indexes: matches!(config.storage, StorageMode::S3 { .. }),
        }
    }
}

/// What one tick saw and did.
#[derive(Debug, Default, Clone)]
pub struct TickReport {
    pub workers: BTreeMap<QueueName, usize>,
    pub draining: usize,
    pub context_ready: bool,
    pub commands: Option<CommandSummary>,
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let workers: Vec<String> = self
            .workers
            .iter()
            .map(|(q, n)| format!("{q}={n}"))
            .collect();
        write!(
            f,
            "workers [{}] draining={} context={}",
            workers.join(" "),
            self.draining,
            if self.context_ready { "ready" } else { "unavailable" }
        )
    }
}

#[derive(Debug, Default, Clone)]
pub struct SupervisorStats {
    pub ticks: u64,
    pub context_acquisitions: u64,
    pub commands_applied: usize,
}

impl fmt::Display for SupervisorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ticks={} context_acquisitions={} commands_applied={}",
            self.ticks, self.context_acquisitions, self.commands_applied
        )
    }
}

/// Owns this node's worker pools and keeps them matched to the campaign
/// config. One per process.
pub struct Supervisor {
    node_id: String,
    campaign: String,
    data_root: PathBuf,
    store: Arc<dyn Storage>,
    provider: Arc<dyn ContextProvider>,
    commands: Option<CommandProcessor>,
    deps: WorkerDeps,
    pools: BTreeMap<QueueName, WorkerPool>,
    executor: Option<(Arc<dyn TaskExecutor>, Instant)>,
    last_liveness: Option<Instant>,
    last_sync: Option<Instant>,
    background: Option<JoinHandle<()>>,
    settings: SupervisorSettings,
    stats: SupervisorStats,
}

impl Supervisor {
    pub fn new(
        config: &Config,
        store: Arc<dyn Storage>,
        provider: Arc<dyn ContextProvider>,
        commands: Option<Arc<dyn CommandQueue>>,
        deps: WorkerDeps,
    ) -> Self {
        let commands = commands.map(|queue| {
            CommandProcessor::new(queue, store.clone(), &config.campaign, deps.exclusions.clone())
        });
        let pools = deps
            .queues
            .keys()
            .map(|q| (*q, WorkerPool::new(*q, &config.node_id, deps.clone())))
            .collect();
        Self {
            node_id: config.node_id.clone(),
            campaign: config.campaign.clone(),
            data_root: config.data_root.clone(),
            store,
            provider,
            commands,
            deps,
            pools,
            executor: None,
            last_liveness: None,
            last_sync: None,
            background: None,
            settings: SupervisorSettings::from_config(config),
            stats: SupervisorStats::default(),
        }
    }

    pub fn with_settings(mut self, settings: SupervisorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn stats(&self) -> &SupervisorStats {
        &self.stats
    }

    pub fn active_workers(&self) -> BTreeMap<QueueName, usize> {
        self.pools.iter().map(|(q, p)| (*q, p.active())).collect()
    }

    /// Tick until `shutdown` flips, then drain every worker.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<SupervisorStats> {
        info!(
            node_id = self.node_id.as_str(),
            campaign = self.campaign.as_str(),
            tick_secs = self.settings.tick_interval.as_secs(),
            "Supervisor running"
        );
        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    debug!("Tick: {report}");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(self.stats)
    }

    pub async fn tick(&mut self) -> TickReport {
        self.stats.ticks += 1;

        // Replace an ageing context. Loops already running keep theirs.
        if self
            .executor
            .as_ref()
            .is_some_and(|(_, at)| at.elapsed() >= self.settings.context_refresh)
        {
            info!("Refreshing execution context");
            self.acquire_context().await;
        }

        if due(self.last_liveness, self.settings.liveness_interval) {
            self.publish_liveness("running").await;
            self.last_liveness = Some(Instant::now());
        }

        let commands = match &self.commands {
            Some(processor) => match processor.process().await {
                Ok(summary) => {
                    self.stats.commands_applied += summary.applied;
                    Some(summary)
                }
                Err(e) => {
                    warn!(error = %e, "Command processing failed");
                    None
                }
            },
            None => None,
        };

        let mut disconnected = false;
        for pool in self.pools.values_mut() {
            disconnected |= pool.reap().await.contains(&LoopExit::Disconnected);
        }
        let stale = self
            .executor
            .as_ref()
            .is_some_and(|(executor, _)| !executor.is_connected());
        if disconnected || stale {
            warn!("Execution context disconnected, acquiring a new one");
            self.executor = None;
        }
        if self.executor.is_none() {
            self.acquire_context().await;
        }

        match self.load_scaling().await {
            Some(scaling) => {
                let executor = self.executor.as_ref().map(|(e, _)| e.clone());
                for (queue, pool) in self.pools.iter_mut() {
                    if let Err(e) = pool.reconcile(scaling.target(*queue), executor.as_ref()) {
                        warn!(queue = %queue, error = %e, "Failed to resize worker pool");
                    }
                }
            }
            None => debug!("Keeping current worker counts"),
        }

        if due(self.last_sync, self.settings.sync_interval) {
            self.start_background_sync();
        }

        TickReport {
            workers: self.active_workers(),
            draining: self.pools.values().map(|p| p.draining()).sum(),
            context_ready: self.executor.is_some(),
            commands,
        }
    }

    /// Cancel every pool, wait for the loops and any running sync, and
    /// mark the node stopped.
    pub async fn shutdown(&mut self) {
        info!("Draining workers");
        for pool in self.pools.values_mut() {
            pool.cancel_all();
        }
        for pool in self.pools.values_mut() {
            pool.join_all().await;
        }
        if let Some(handle) = self.background.take() {
            let _ = handle.await;
        }
        self.publish_liveness("stopped").await;
        info!(stats = %self.stats, "Supervisor stopped");
    }

    async fn acquire_context(&mut self) {
        match self.provider.acquire().await {
            Ok(executor) => {
                self.stats.context_acquisitions += 1;
                self.executor = Some((executor, Instant::now()));
            }
            Err(e) => warn!(error = %e, "Execution context unavailable"),
        }
    }

    /// `None` means the config could not be read and pools stay as they are.
    async fn load_scaling(&self) -> Option<NodeScaling> {
        match CampaignConfig::load(self.store.as_ref(), &self.campaign).await {
            Ok(Some(config)) => Some(config.scaling_for(&self.node_id)),
            Ok(None) => {
                debug!(campaign = self.campaign.as_str(), "No campaign config, running no workers");
                Some(NodeScaling::default())
            }
            Err(e) => {
                warn!(error = %e, "Failed to read campaign config");
                None
            }
        }
    }

    async fn publish_liveness(&self, status: &str) {
        let doc = StatusDocument {
            node_id: self.node_id.clone(),
            campaign: self.campaign.clone(),
            timestamp: Utc::now(),
            status: status.to_string(),
            system: read_system_stats().await,
            workers: self
                .pools
                .iter()
                .map(|(q, p)| (q.to_string(), p.active()))
                .collect(),
        };
        if let Err(e) = liveness::publish(self.store.as_ref(), &doc).await {
            warn!(error = %e, "Failed to publish liveness");
        }
    }

    /// Index sync and the campaign report run off the tick loop. A sync
    /// still in progress delays the next one.
    fn start_background_sync(&mut self) {
        if self.background.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Previous sync still running");
            return;
        }
        self.last_sync = Some(Instant::now());

        let store = self.store.clone();
        let queues = self.deps.queues.clone();
        let campaign = self.campaign.clone();
        let node_id = self.node_id.clone();
        let index_sync = self
            .settings
            .sync_indexes
            .then(|| IndexSync::new(store.clone(), &self.data_root, &campaign, &node_id));

        self.background = Some(tokio::spawn(async move {
            if let Some(sync) = index_sync {
                if let Err(e) = sync.run().await {
                    warn!(error = %e, "Index sync failed");
                }
            }
            match write_report(store.as_ref(), &campaign, &node_id, &queues).await {
                Ok(report) => debug!(queues = report.queues.len(), "Campaign report written"),
                Err(e) => warn!(error = %e, "Failed to write campaign report"),
            }
        }));
    }
}

fn due(last: Option<Instant>, every: Duration) -> bool {
    last.map_or(true, |at| at.elapsed() >= every)
}
