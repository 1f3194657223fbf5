use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Corrupt object {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("Key is locked by another writer: {0}")]
    Busy(String),

    #[error("Remote storage error: {0}")]
    Remote(String),
}
