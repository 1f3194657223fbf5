use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use prospector_wal::{EntityRegistry, Quarantine, WalRecord};

use crate::error::Result;
use crate::frame::Frame;
use crate::peers::{Peer, PeerSet};
use crate::tailer::WalTailer;
use crate::transport::Transport;

/// What happened to one inbound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    Stored,
    Duplicate,
    /// Our own record came back to us.
    Echo,
    UnknownEntity,
    Malformed,
    ProbeAnswered,
    PeerLearned,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub records: usize,
    pub sent: usize,
    pub failed: usize,
    pub full_rescan: bool,
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "records={} sent={} failed={} full_rescan={}",
            self.records, self.sent, self.failed, self.full_rescan
        )
    }
}

/// Ships locally authored WAL records to every known peer and files
/// records received from peers into quarantine.
pub struct Replicator {
    node_id: String,
    tailer: Mutex<WalTailer>,
    peers: Arc<PeerSet>,
    transport: Arc<dyn Transport>,
    registry: Arc<dyn EntityRegistry>,
    quarantine: Arc<Quarantine>,
    full_rescan_every: u64,
    ticks: AtomicU64,
}

impl Replicator {
    pub fn new(
        node_id: &str,
        tailer: WalTailer,
        peers: Arc<PeerSet>,
        transport: Arc<dyn Transport>,
        registry: Arc<dyn EntityRegistry>,
        quarantine: Arc<Quarantine>,
        full_rescan_every: u32,
    ) -> Self {
        Self {
            node_id: node_id.to_string(),
            tailer: Mutex::new(tailer),
            peers,
            transport,
            registry,
            quarantine,
            full_rescan_every: u64::from(full_rescan_every.max(1)),
            ticks: AtomicU64::new(0),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.peers
    }

    /// Send everything new in the journal to every peer. Every Nth tick the
    /// whole journal is resent, which heals datagrams lost earlier.
    pub async fn tick(&self) -> Result<TickReport> {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let full_rescan = tick % self.full_rescan_every == 0;

        let records = {
            let mut tailer = self.tailer.lock().await;
            if full_rescan {
                tailer.reset();
            }
            tailer.scan().await?
        };

        let mut report = TickReport {
            records: records.len(),
            full_rescan,
            ..Default::default()
        };
        let peers = self.peers.snapshot();
        if records.is_empty() || peers.is_empty() {
            return Ok(report);
        }

        for record in &records {
            let datagram = match Frame::Record(record.clone()).encode() {
                Ok(d) => d,
                Err(e) => {
                    warn!(error = %e, "Unencodable WAL record, skipping");
                    continue;
                }
            };
            for peer in &peers {
                match self.transport.send(peer.addr, &datagram).await {
                    Ok(()) => report.sent += 1,
                    Err(e) => {
                        report.failed += 1;
                        debug!(peer = %peer.addr, error = %e, "Gossip send failed");
                    }
                }
            }
        }
        Ok(report)
    }

    /// Process one inbound datagram from `from`.
    pub async fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) -> Result<Handled> {
        let frame = match Frame::decode(datagram) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(from = %from, error = %e, "Dropping malformed datagram");
                return Ok(Handled::Malformed);
            }
        };

        match frame {
            Frame::Probe { node_id } => {
                if node_id == self.node_id {
                    return Ok(Handled::Echo);
                }
                let reply = Frame::ProbeReply {
                    node_id: self.node_id.clone(),
                }
                .encode()?;
                if let Err(e) = self.transport.send(from, &reply).await {
                    debug!(to = %from, error = %e, "Probe reply failed");
                }
                self.learn(from, node_id);
                Ok(Handled::ProbeAnswered)
            }
            Frame::ProbeReply { node_id } => {
                self.learn(from, node_id);
                Ok(Handled::PeerLearned)
            }
            Frame::Record(record) => self.receive_record(record).await,
        }
    }

    async fn receive_record(&self, record: WalRecord) -> Result<Handled> {
        if record.origin == self.node_id {
            return Ok(Handled::Echo);
        }
        if !self.registry.contains(&record.target).await {
            debug!(entity = %record.target, origin = %record.origin, "Dropping update for unknown entity");
            return Ok(Handled::UnknownEntity);
        }
        if self.quarantine.append(&record).await? {
            Ok(Handled::Stored)
        } else {
            Ok(Handled::Duplicate)
        }
    }

    fn learn(&self, addr: SocketAddr, node_id: String) {
        if self.peers.insert(Peer {
            addr,
            node_id: Some(node_id.clone()),
        }) {
            info!(peer = %addr, node_id = %node_id, "Learned gossip peer");
        }
    }
}
