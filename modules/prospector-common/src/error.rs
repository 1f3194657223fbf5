use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProspectorError>;

#[derive(Error, Debug)]
pub enum ProspectorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
