//! Error types for the receptorctl library

use receptorctl_proto::ProtocolError;
use receptorctl_transport::TransportError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for control socket operations
#[derive(Debug, Error)]
pub enum ReceptorctlError {
    /// Transport-related errors
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Protocol-related errors
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// `connect` called on a connection that is already handshaked
    #[error("Connection is already established")]
    AlreadyConnected,

    /// Operation attempted on a closed connection
    #[error("Connection is closed")]
    ConnectionClosed,

    /// A submit parameter collides with a reserved or earlier key
    #[error("Duplicate or illegal parameter {0}")]
    DuplicateParameter(String),

    /// An `@file` submit parameter could not be read
    #[error("Could not read parameter file {}: {source}", .path.display())]
    ParameterFile {
        /// File named by the parameter
        path: PathBuf,
        /// Underlying failure
        source: std::io::Error,
    },

    /// Waiting for a work unit exceeded its deadline
    #[error("Timed out waiting for work unit {0}")]
    WaitTimeout(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad address, conflicting TLS settings, bad submit parameters; raised before I/O
    Configuration,
    /// Missing socket, unreachable host, TLS failure
    Transport,
    /// Bad banner, unexpected acknowledgement, remote `ERROR:` reply
    Protocol,
}

impl ReceptorctlError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(e) if e.is_configuration() => ErrorKind::Configuration,
            Self::Transport(_) | Self::Io(_) => ErrorKind::Transport,
            Self::DuplicateParameter(_) | Self::ParameterFile { .. } => ErrorKind::Configuration,
            Self::AlreadyConnected | Self::ConnectionClosed => ErrorKind::Configuration,
            Self::Protocol(ProtocolError::Io(_)) => ErrorKind::Transport,
            Self::Protocol(_) | Self::WaitTimeout(_) => ErrorKind::Protocol,
        }
    }

    /// The message of a remote `ERROR:` reply, if this is one
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            Self::Protocol(ProtocolError::Remote(message))
            | Self::Protocol(ProtocolError::RemoteSubmitError(message)) => Some(message),
            _ => None,
        }
    }
}
