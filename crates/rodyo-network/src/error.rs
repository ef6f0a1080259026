use rodyo_protocol::{NodeId, ProtocolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Node {0} is already registered")]
    DuplicateNode(NodeId),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
