use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Runtime request failed: {0}")]
    Network(String),

    #[error("Runtime info request failed with status {0}")]
    InfoStatus(u16),

    #[error("Runtime request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid runtime response: {0}")]
    Decode(String),
}
