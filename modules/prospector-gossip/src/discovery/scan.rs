use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use super::Discovery;
use crate::error::{GossipError, Result};
use crate::frame::Frame;
use crate::peers::Peer;

/// Upper bound on addresses probed per round.
const MAX_SCAN_ADDRESSES: u64 = 1024;

/// Parse `10.0.0.0/24` or `10.0.0.10-10.0.0.40` into an inclusive range.
/// For CIDR blocks the network and broadcast addresses are skipped.
pub fn parse_range(spec: &str) -> Result<Vec<Ipv4Addr>> {
    let spec = spec.trim();
    let (start, end) = if let Some((base, bits)) = spec.split_once('/') {
        let base: Ipv4Addr = base
            .parse()
            .map_err(|_| GossipError::InvalidRange(format!("bad address in {spec}")))?;
        let bits: u32 = bits
            .parse()
            .ok()
            .filter(|b| *b <= 32)
            .ok_or_else(|| GossipError::InvalidRange(format!("bad prefix length in {spec}")))?;
        let mask = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
        let network = u32::from(base) & mask;
        let broadcast = network | !mask;
        if bits >= 31 {
            (network, broadcast)
        } else {
            (network + 1, broadcast - 1)
        }
    } else if let Some((a, b)) = spec.split_once('-') {
        let a: Ipv4Addr = a
            .trim()
            .parse()
            .map_err(|_| GossipError::InvalidRange(format!("bad start address in {spec}")))?;
        let b: Ipv4Addr = b
            .trim()
            .parse()
            .map_err(|_| GossipError::InvalidRange(format!("bad end address in {spec}")))?;
        (u32::from(a), u32::from(b))
    } else {
        return Err(GossipError::InvalidRange(format!(
            "expected CIDR or start-end, got {spec}"
        )));
    };

    if end < start {
        return Err(GossipError::InvalidRange(format!("empty range {spec}")));
    }
    let count = u64::from(end - start) + 1;
    if count > MAX_SCAN_ADDRESSES {
        return Err(GossipError::InvalidRange(format!(
            "{spec} covers {count} addresses, limit is {MAX_SCAN_ADDRESSES}"
        )));
    }
    Ok((start..=end).map(Ipv4Addr::from).collect())
}

/// Last-resort discovery: probe every address in a configured range and
/// keep the ones that answer.
pub struct ScanDiscovery {
    node_id: String,
    targets: Vec<Ipv4Addr>,
    port: u16,
    window: Duration,
}

impl ScanDiscovery {
    pub fn new(node_id: &str, range: &str, port: u16) -> Result<Self> {
        Ok(Self {
            node_id: node_id.to_string(),
            targets: parse_range(range)?,
            port,
            window: Duration::from_secs(2),
        })
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

#[async_trait]
impl Discovery for ScanDiscovery {
    fn name(&self) -> &str {
        "scan"
    }

    async fn discover(&self) -> Result<Vec<Peer>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let probe = Frame::Probe {
            node_id: self.node_id.clone(),
        }
        .encode()?;
        for ip in &self.targets {
            let to = SocketAddr::from((*ip, self.port));
            if let Err(e) = socket.send_to(&probe, to).await {
                debug!(to = %to, error = %e, "Probe send failed");
            }
        }

        let mut found: HashMap<SocketAddr, String> = HashMap::new();
        let deadline = Instant::now() + self.window;
        let mut buf = [0u8; 512];
        while let Ok(received) = timeout_at(deadline, socket.recv_from(&mut buf)).await {
            let (len, from) = received?;
            if let Ok(Frame::ProbeReply { node_id }) = Frame::decode(&buf[..len]) {
                if node_id != self.node_id {
                    found.insert(from, node_id);
                }
            }
        }

        Ok(found
            .into_iter()
            .map(|(addr, node_id)| Peer {
                addr,
                node_id: Some(node_id),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cidr_skips_network_and_broadcast() {
        let ips = parse_range("192.168.1.0/30").unwrap();
        assert_eq!(
            ips,
            vec![Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::new(192, 168, 1, 2)]
        );
        assert_eq!(parse_range("10.0.0.0/24").unwrap().len(), 254);
    }

    #[test]
    fn dash_ranges_are_inclusive() {
        let ips = parse_range("10.0.0.10 - 10.0.0.12").unwrap();
        assert_eq!(ips.len(), 3);
        assert_eq!(ips[2], Ipv4Addr::new(10, 0, 0, 12));
    }

    #[test]
    fn oversized_and_malformed_ranges_are_rejected() {
        assert!(parse_range("10.0.0.0/16").is_err());
        assert!(parse_range("10.0.0.9-10.0.0.1").is_err());
        assert!(parse_range("10.0.0.0/33").is_err());
        assert!(parse_range("somewhere").is_err());
    }

    #[tokio::test]
    async fn probes_collect_replies() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = responder.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (len, from) = responder.recv_from(&mut buf).await.unwrap();
            assert!(matches!(Frame::decode(&buf[..len]), Ok(Frame::Probe { .. })));
            let reply = Frame::ProbeReply {
                node_id: "node-b".into(),
            }
            .encode()
            .unwrap();
            responder.send_to(&reply, from).await.unwrap();
        });

        let scan = ScanDiscovery::new("node-a", "127.0.0.1-127.0.0.1", port)
            .unwrap()
            .with_window(Duration::from_millis(500));
        let peers = scan.discover().await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].node_id.as_deref(), Some("node-b"));
    }
}
