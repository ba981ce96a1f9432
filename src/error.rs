//! Error types for the turnwire protocol.

/// Top-level error type for the turn-taking and transcript-streaming core.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Malformed wire fragment framing (field count, encoding, indices).
    #[error("frame error: {0}")]
    Frame(String),

    /// A reassembled payload could not be decoded (base64 or JSON).
    #[error("payload error: {0}")]
    Payload(String),

    /// Channel send/receive error between stages.
    #[error("channel error: {0}")]
    Channel(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ProtocolError>;
