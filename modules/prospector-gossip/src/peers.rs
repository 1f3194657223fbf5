use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::RwLock;

/// A remote gossip endpoint. Statically configured hosts may not have
/// announced their node id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub addr: SocketAddr,
    pub node_id: Option<String>,
}

/// Best-effort cache of known peers, keyed by address. Entries are only
/// dropped on restart.
pub struct PeerSet {
    local_node_id: String,
    peers: RwLock<HashMap<SocketAddr, Peer>>,
}

impl PeerSet {
    pub fn new(local_node_id: &str) -> Self {
        Self {
            local_node_id: local_node_id.to_string(),
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Add or refresh a peer. Returns `true` if the address was new.
    /// Our own node id is never added.
    pub fn insert(&self, peer: Peer) -> bool {
        if peer.node_id.as_deref() == Some(self.local_node_id.as_str()) {
            return false;
        }
        let Ok(mut peers) = self.peers.write() else {
            return false;
        };
        match peers.get_mut(&peer.addr) {
            Some(existing) => {
                if peer.node_id.is_some() {
                    existing.node_id = peer.node_id;
                }
                false
            }
            None => {
                peers.insert(peer.addr, peer);
                true
            }
        }
    }

    pub fn extend(&self, peers: impl IntoIterator<Item = Peer>) -> usize {
        peers.into_iter().filter(|p| self.insert(p.clone())).count()
    }

    pub fn snapshot(&self) -> Vec<Peer> {
        let mut out: Vec<Peer> = self
            .peers
            .read()
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default();
        out.sort_by_key(|p| p.addr);
        out
    }

    pub fn len(&self) -> usize {
        self.peers.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn self_is_never_a_peer() {
        let set = PeerSet::new("node-a");
        assert!(!set.insert(Peer {
            addr: addr("10.0.0.1:9999"),
            node_id: Some("node-a".into())
        }));
        assert!(set.is_empty());
    }

    #[test]
    fn later_discovery_fills_in_node_id() {
        let set = PeerSet::new("node-a");
        assert!(set.insert(Peer {
            addr: addr("10.0.0.2:9999"),
            node_id: None
        }));
        assert!(!set.insert(Peer {
            addr: addr("10.0.0.2:9999"),
            node_id: Some("node-b".into())
        }));
        assert_eq!(set.snapshot()[0].node_id.as_deref(), Some("node-b"));
        assert_eq!(set.len(), 1);
    }
}
