use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use prospector_common::Config;
use prospector_wal::{DirectoryRegistry, Quarantine, WalJournal, STATE_CHECKPOINT_KEY};

use crate::discovery::{
    Discovery, MdnsDiscovery, ScanDiscovery, StaticHostDiscovery, TieredDiscovery,
};
use crate::error::Result;
use crate::peers::PeerSet;
use crate::replicator::{Handled, Replicator};
use crate::tailer::WalTailer;
use crate::transport::UdpTransport;

/// How often discovery is rerun once peers are known.
const DISCOVERY_INTERVAL: Duration = Duration::from_secs(300);
/// Retry interval while the peer set is empty.
const LONELY_DISCOVERY_INTERVAL: Duration = Duration::from_secs(30);
const MAX_DATAGRAM: usize = 64 * 1024;

pub struct GossipService {
    socket: Arc<UdpSocket>,
    replicator: Arc<Replicator>,
    discovery: TieredDiscovery,
    tick_interval: Duration,
}

impl GossipService {
    /// Bind the gossip port and assemble the discovery tiers from config.
    pub async fn bind(config: &Config) -> Result<Self> {
        let settings = &config.gossip;
        let socket = Arc::new(UdpSocket::bind(("0.0.0.0", settings.port)).await?);
        info!(addr = %socket.local_addr()?, node_id = %config.node_id, "Gossip socket bound");

        let mut tiers: Vec<Box<dyn Discovery>> = Vec::new();
        if settings.mdns {
            match MdnsDiscovery::new(&config.node_id, settings.port) {
                Ok(mdns) => tiers.push(Box::new(mdns)),
                Err(e) => warn!(error = %e, "mDNS unavailable, continuing without it"),
            }
        }
        if !settings.peers.is_empty() {
            tiers.push(Box::new(StaticHostDiscovery::new(
                settings.peers.clone(),
                settings.port,
            )));
        }
        if let Some(range) = &settings.scan_range {
            tiers.push(Box::new(ScanDiscovery::new(
                &config.node_id,
                range,
                settings.port,
            )?));
        }

        let journal = WalJournal::new(&config.data_root, &config.node_id);
        let replicator = Replicator::new(
            &config.node_id,
            WalTailer::new(journal.dir())
                .with_checkpoint(&config.data_root.join(STATE_CHECKPOINT_KEY), &config.node_id),
            Arc::new(PeerSet::new(&config.node_id)),
            Arc::new(UdpTransport::new(socket.clone())),
            Arc::new(DirectoryRegistry::new(&config.data_root)),
            Arc::new(Quarantine::new(&config.data_root)),
            settings.full_rescan_every,
        );

        Ok(Self {
            socket,
            replicator: Arc::new(replicator),
            discovery: TieredDiscovery::new(tiers),
            tick_interval: settings.tick_interval,
        })
    }

    pub fn replicator(&self) -> &Arc<Replicator> {
        &self.replicator
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let receiver = tokio::spawn(receive_loop(
            self.socket.clone(),
            self.replicator.clone(),
            shutdown.clone(),
        ));

        let mut tick = tokio::time::interval(self.tick_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut next_discovery = tokio::time::Instant::now();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if stopping(changed, &shutdown) {
                        break;
                    }
                }
                _ = tokio::time::sleep_until(next_discovery) => {
                    self.refresh_peers().await;
                    let wait = if self.replicator.peers().is_empty() {
                        LONELY_DISCOVERY_INTERVAL
                    } else {
                        DISCOVERY_INTERVAL
                    };
                    next_discovery = tokio::time::Instant::now() + wait;
                }
                _ = tick.tick() => {
                    match self.replicator.tick().await {
                        Ok(report) if report.records > 0 => info!(%report, "Gossip tick"),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Gossip tick failed"),
                    }
                }
            }
        }

        receiver.abort();
        info!("Gossip service stopped");
        Ok(())
    }

    async fn refresh_peers(&self) {
        if self.discovery.is_empty() {
            return;
        }
        match self.discovery.discover().await {
            Ok(found) => {
                let added = self.replicator.peers().extend(found);
                if added > 0 {
                    info!(added, known = self.replicator.peers().len(), "Peer set grew");
                }
            }
            Err(e) => warn!(error = %e, "Discovery failed"),
        }
    }
}

/// A dropped sender counts as shutdown; otherwise `changed()` would resolve
/// immediately forever.
fn stopping(
    changed: std::result::Result<(), watch::error::RecvError>,
    shutdown: &watch::Receiver<bool>,
) -> bool {
    changed.is_err() || *shutdown.borrow()
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    replicator: Arc<Replicator>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if stopping(changed, &shutdown) {
                    return;
                }
            }
            received = socket.recv_from(&mut buf) => {
                let (len, from) = match received {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "Gossip receive failed");
                        continue;
                    }
                };
                match replicator.handle_datagram(&buf[..len], from).await {
                    Ok(Handled::Stored) => debug!(from = %from, "Stored remote record"),
                    Ok(_) => {}
                    Err(e) => warn!(from = %from, error = %e, "Failed to handle datagram"),
                }
            }
        }
    }
}
