//! Peer discovery. Tiers are tried in order and the first one that finds
//! anybody wins for that round.

mod mdns;
mod scan;
mod static_hosts;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;
use crate::peers::Peer;

pub use mdns::MdnsDiscovery;
pub use scan::{parse_range, ScanDiscovery};
pub use static_hosts::StaticHostDiscovery;

#[async_trait]
pub trait Discovery: Send + Sync {
    fn name(&self) -> &str;
    async fn discover(&self) -> Result<Vec<Peer>>;
}

pub struct TieredDiscovery {
    tiers: Vec<Box<dyn Discovery>>,
}

impl TieredDiscovery {
    pub fn new(tiers: Vec<Box<dyn Discovery>>) -> Self {
        Self { tiers }
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

#[async_trait]
impl Discovery for TieredDiscovery {
    fn name(&self) -> &str {
        "tiered"
    }

    async fn discover(&self) -> Result<Vec<Peer>> {
        for tier in &self.tiers {
            match tier.discover().await {
                Ok(peers) if !peers.is_empty() => {
                    debug!(tier = tier.name(), found = peers.len(), "Discovery tier found peers");
                    return Ok(peers);
                }
                Ok(_) => debug!(tier = tier.name(), "Discovery tier found nobody"),
                Err(e) => warn!(tier = tier.name(), error = %e, "Discovery tier failed"),
            }
        }
        Ok(Vec::new())
    }
}
