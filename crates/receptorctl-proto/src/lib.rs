//! # Receptorctl Protocol
//!
//! Line framing, control messages and the unit-of-work schema spoken over a
//! node's control socket.

#![warn(missing_docs)]

/// Newline-delimited framing over async streams
pub mod codec;

/// Control commands and reply parsing
pub mod message;

/// Unit-of-work status schema shared with the worker runtime
pub mod work;

/// Error types for protocol operations
pub mod error;

pub use codec::LineCodec;
pub use message::{
    error_message, parse_banner, parse_connect_ack, parse_reply, parse_results_ack, parse_submit_ack, ControlCommand,
};
pub use work::{PingResult, StatusFileData, SubmitResult, WorkState, WorkStatus};
pub use error::ProtocolError;
