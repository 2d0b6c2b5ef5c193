//! # Receptorctl Transport
//!
//! Address parsing, TLS client profiles and connected streams for a node's
//! control socket.

#![warn(missing_docs)]

/// Control socket address grammar
pub mod address;

/// TLS client profiles and rustls configuration
pub mod tls;

/// Connected control socket streams
pub mod stream;

/// Transport abstraction and implementations
pub mod transport;

/// Transport-specific error types
pub mod error;

pub use address::ConnectionSpec;
pub use tls::TlsProfile;
pub use stream::ControlStream;
pub use transport::{
    transport_for, ConnectionInfo, TcpTransport, Transport, TransportType, UnixTransport,
    DEFAULT_CONNECT_TIMEOUT,
};
pub use error::TransportError;
