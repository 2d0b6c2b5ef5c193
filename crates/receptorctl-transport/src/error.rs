//! Transport-specific error types

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Address uses a known scheme but its body does not parse
    #[error("Malformed socket address: {0}")]
    MalformedAddress(String),

    /// Address uses an unrecognized scheme
    #[error("Invalid socket address {0}")]
    InvalidAddress(String),

    /// Unix socket path does not exist
    #[error("Socket path does not exist: {}", .0.display())]
    PathNotFound(PathBuf),

    /// No resolved candidate for a TCP/TLS endpoint accepted a connection
    #[error("Could not connect to host {host} port {port}{}", .last_error.as_ref().map(|e| format!(": {}", e)).unwrap_or_default())]
    NoRouteToHost {
        /// Host that was dialed
        host: String,
        /// Port that was dialed
        port: u16,
        /// Failure reported by the last candidate tried
        last_error: Option<String>,
    },

    /// Explicit TLS material and a profile source were both supplied,
    /// or a profile source was supplied without a profile name
    #[error("Conflicting TLS configuration: {0}")]
    ConflictingConfig(String),

    /// The named TLS profile is not in the profile file
    #[error("TLS client profile not found: {0}")]
    ProfileNotFound(String),

    /// The profile file could not be read or parsed
    #[error("Invalid TLS profile file {}: {message}", .path.display())]
    ProfileFile {
        /// Profile file path
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// TLS material could not be loaded or the TLS context could not be built
    #[error("TLS error: {0}")]
    Tls(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Whether this error is a configuration problem detected before any I/O
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MalformedAddress(_)
                | Self::InvalidAddress(_)
                | Self::ConflictingConfig(_)
                | Self::ProfileNotFound(_)
                | Self::ProfileFile { .. }
        )
    }
}
