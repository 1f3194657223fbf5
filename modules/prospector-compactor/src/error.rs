use thiserror::Error;

use prospector_storage::StorageError;
use prospector_wal::WalError;

pub type Result<T> = std::result::Result<T, CompactionError>;

#[derive(Debug, Error)]
pub enum CompactionError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Wal(#[from] WalError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Index {index} is locked by {holder} since {since}")]
    Locked {
        index: String,
        holder: String,
        since: String,
    },

    #[error("Checkpoint {key} changed during compaction")]
    Conflict { key: String },

    #[error("Invalid index definition: {0}")]
    InvalidIndex(String),
}
