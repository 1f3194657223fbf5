use thiserror::Error;

use prospector_queue::QueueError;
use prospector_storage::StorageError;
use prospector_wal::WalError;

pub type Result<T> = std::result::Result<T, SupervisorError>;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Wal(#[from] WalError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid campaign config: {0}")]
    CampaignConfig(#[from] toml::de::Error),

    #[error("No queue registered for {0}")]
    UnknownQueue(String),
}
