use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserlessError>;

#[derive(Debug, Error)]
pub enum BrowserlessError {
    /// The service could not be reached at all. Callers treat the client as
    /// dead and build a new one.
    #[error("Browserless unreachable: {0}")]
    Disconnected(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid client configuration: {0}")]
    Config(String),
}

impl BrowserlessError {
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }
}

impl From<reqwest::Error> for BrowserlessError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            BrowserlessError::Disconnected(err.to_string())
        } else {
            BrowserlessError::Network(err.to_string())
        }
    }
}
