use thiserror::Error;

use prospector_wal::WalError;

pub type Result<T> = std::result::Result<T, GossipError>;

#[derive(Debug, Error)]
pub enum GossipError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wal(#[from] WalError),

    #[error("Malformed datagram: {0}")]
    Frame(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Invalid scan range: {0}")]
    InvalidRange(String),
}
