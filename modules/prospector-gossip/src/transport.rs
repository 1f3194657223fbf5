use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;

/// Outbound datagrams. Fire and forget: no acknowledgement, no retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, to: SocketAddr, datagram: &[u8]) -> io::Result<()>;
}

pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, to: SocketAddr, datagram: &[u8]) -> io::Result<()> {
        self.socket.send_to(datagram, to).await.map(|_| ())
    }
}
