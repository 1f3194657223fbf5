use async_trait::async_trait;
use tokio::net::lookup_host;
use tracing::debug;

use super::Discovery;
use crate::error::Result;
use crate::peers::Peer;

/// Configured host names. A bare name that does not resolve is retried
/// with the `.pi` suffix the fleet's routers hand out.
pub struct StaticHostDiscovery {
    hosts: Vec<String>,
    port: u16,
}

impl StaticHostDiscovery {
    pub fn new(hosts: Vec<String>, port: u16) -> Self {
        Self { hosts, port }
    }

    fn candidates(&self, host: &str) -> Vec<String> {
        if host.contains(':') {
            return vec![host.to_string()];
        }
        let mut out = vec![format!("{host}:{}", self.port)];
        if !host.contains('.') {
            out.push(format!("{host}.pi:{}", self.port));
        }
        out
    }
}

#[async_trait]
impl Discovery for StaticHostDiscovery {
    fn name(&self) -> &str {
        "static"
    }

    async fn discover(&self) -> Result<Vec<Peer>> {
        let mut peers = Vec::new();
        for host in &self.hosts {
            for candidate in self.candidates(host) {
                match lookup_host(candidate.as_str()).await {
                    Ok(addrs) => {
                        if let Some(addr) = addrs.into_iter().find(|a| a.is_ipv4()) {
                            peers.push(Peer {
                                addr,
                                node_id: None,
                            });
                            break;
                        }
                    }
                    Err(e) => debug!(host = %candidate, error = %e, "Host did not resolve"),
                }
            }
        }
        Ok(peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_names_get_a_pi_fallback() {
        let d = StaticHostDiscovery::new(vec![], 9999);
        assert_eq!(d.candidates("coder"), vec!["coder:9999", "coder.pi:9999"]);
        assert_eq!(d.candidates("coder.lan"), vec!["coder.lan:9999"]);
        assert_eq!(d.candidates("10.0.0.5:7000"), vec!["10.0.0.5:7000"]);
    }

    #[tokio::test]
    async fn literal_addresses_resolve() {
        let d = StaticHostDiscovery::new(vec!["127.0.0.1".into()], 9999);
        let peers = d.discover().await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].addr, "127.0.0.1:9999".parse().unwrap());
    }
}
