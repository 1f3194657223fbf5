use thiserror::Error;

pub type Result<T> = std::result::Result<T, WalError>;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt WAL record: {0}")]
    Corrupt(String),

    #[error("Field {field} contains a separator character")]
    Separator { field: &'static str },

    #[error("Record authored by {origin} cannot be appended to the journal of {node}")]
    ForeignOrigin { origin: String, node: String },
}
