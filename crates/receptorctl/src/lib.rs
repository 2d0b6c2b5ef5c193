//! # Receptorctl
//!
//! Client for the control socket of a mesh network node.
//!
//! A [`ReceptorControl`] dials a Unix, TCP or TLS control socket, reads the
//! node's banner and then exchanges newline-delimited JSON commands. Work
//! submission, result streaming and service relays take over the connection
//! for the rest of its life.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use receptorctl_proto as proto;
pub use receptorctl_transport as transport;

/// Error types for the receptorctl library
pub mod error;

/// Connection configuration
pub mod config;

/// Control connection and simple commands
pub mod control;

/// Work submission and result streaming
pub mod work;

/// Connect-to-service relay
pub mod relay;

pub use config::{ControlConfig, ControlConfigBuilder, SOCKET_ENV_VAR};
pub use control::ReceptorControl;
pub use error::{ErrorKind, ReceptorctlError};
pub use relay::{RelayEnd, RelayStats, ServiceConnection};
pub use work::{SubmitPayload, WorkResults, WorkSubmission, DEFAULT_NODE};

pub use receptorctl_proto::{PingResult, SubmitResult, WorkState, WorkStatus};

/// Result type alias for control socket operations
pub type Result<T> = std::result::Result<T, ReceptorctlError>;
