use thiserror::Error;

/// Errors raised while encoding or decoding protocol records.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),
}
