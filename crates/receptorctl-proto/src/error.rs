//! Error types for protocol operations

use thiserror::Error;

/// Protocol-level errors raised while talking to a control service
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The first line from the node was not a control banner
    #[error("Failed to connect to Receptor socket: unexpected banner {0:?}")]
    HandshakeFailed(String),

    /// The node answered with an `ERROR:` sentinel
    #[error("{0}")]
    Remote(String),

    /// A connect-to-service request was refused
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// The node did not acknowledge a work submission
    #[error("Failed to start work unit{}", .0.as_ref().map(|m| format!(": {}", m)).unwrap_or_default())]
    SubmitFailed(Option<String>),

    /// The node reported an error after receiving the submitted payload
    #[error("Remote error: {0}")]
    RemoteSubmitError(String),

    /// The node refused to stream results
    #[error("Failed to get results{}", .0.as_ref().map(|m| format!(": {}", m)).unwrap_or_default())]
    ResultsFailed(Option<String>),

    /// The stream ended while a reply was still expected
    #[error("Connection closed by remote node")]
    UnexpectedEof,

    /// A reply line exceeded the configured limit
    #[error("Line too long: {size} bytes (max: {max})")]
    LineTooLong {
        /// Bytes buffered without finding a newline
        size: usize,
        /// Maximum allowed line length
        max: usize,
    },

    /// A line was not valid UTF-8
    #[error("Invalid UTF-8 in reply line")]
    InvalidUtf8,

    /// A reply could not be decoded as JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Underlying stream failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
