use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::Discovery;
use crate::error::{GossipError, Result};
use crate::peers::Peer;

pub const SERVICE_TYPE: &str = "_prospector-gossip._udp.local.";
const NODE_ID_PROPERTY: &str = "node_id";

/// Advertises this node on the local network and browses for others.
pub struct MdnsDiscovery {
    daemon: ServiceDaemon,
    node_id: String,
    window: Duration,
}

impl MdnsDiscovery {
    /// Registers the local service immediately; it stays advertised until
    /// the value is dropped.
    pub fn new(node_id: &str, port: u16) -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(mdns_error)?;
        let host = format!("{node_id}.local.");
        let properties = [(NODE_ID_PROPERTY, node_id)];
        let service = ServiceInfo::new(SERVICE_TYPE, node_id, &host, "", port, &properties[..])
            .map_err(mdns_error)?
            .enable_addr_auto();
        daemon.register(service).map_err(mdns_error)?;
        info!(node_id, port, service = SERVICE_TYPE, "Advertising gossip service");

        Ok(Self {
            daemon,
            node_id: node_id.to_string(),
            window: Duration::from_secs(3),
        })
    }
}

impl Drop for MdnsDiscovery {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.shutdown() {
            debug!(error = %e, "mDNS daemon shutdown failed");
        }
    }
}

#[async_trait]
impl Discovery for MdnsDiscovery {
    fn name(&self) -> &str {
        "mdns"
    }

    async fn discover(&self) -> Result<Vec<Peer>> {
        let events = self.daemon.browse(SERVICE_TYPE).map_err(mdns_error)?;
        let deadline = Instant::now() + self.window;
        let mut peers = Vec::new();

        while let Ok(event) = timeout_at(deadline, events.recv_async()).await {
            let Ok(event) = event else {
                break;
            };
            let ServiceEvent::ServiceResolved(info) = event else {
                continue;
            };
            let Some(node_id) = info.get_property_val_str(NODE_ID_PROPERTY) else {
                continue;
            };
            if node_id == self.node_id {
                continue;
            }
            let port = info.get_port();
            if let Some(ip) = info.get_addresses().iter().find(|ip| ip.is_ipv4()) {
                peers.push(Peer {
                    addr: SocketAddr::new(*ip, port),
                    node_id: Some(node_id.to_string()),
                });
            }
        }

        if let Err(e) = self.daemon.stop_browse(SERVICE_TYPE) {
            warn!(error = %e, "Failed to stop mDNS browse");
        }
        Ok(peers)
    }
}

fn mdns_error(e: mdns_sd::Error) -> GossipError {
    GossipError::Discovery(format!("mdns: {e}"))
}
