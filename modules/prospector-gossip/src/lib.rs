pub mod discovery;
pub mod error;
pub mod frame;
pub mod peers;
pub mod replicator;
pub mod service;
pub mod tailer;
pub mod transport;

pub use discovery::{Discovery, MdnsDiscovery, ScanDiscovery, StaticHostDiscovery, TieredDiscovery};
pub use error::{GossipError, Result};
pub use frame::Frame;
pub use peers::{Peer, PeerSet};
pub use replicator::{Handled, Replicator, TickReport};
pub use service::GossipService;
pub use tailer::WalTailer;
pub use transport::{Transport, UdpTransport};
