//! Connection configuration

use crate::{ReceptorctlError, Result};
use receptorctl_proto::codec::MAX_LINE_SIZE;
use receptorctl_transport::{ConnectionSpec, TlsProfile, DEFAULT_CONNECT_TIMEOUT};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding the default control socket address
pub const SOCKET_ENV_VAR: &str = "RECEPTORCTL_SOCKET";

/// Immutable configuration for one control connection
#[derive(Debug, Clone, PartialEq)]
pub struct ControlConfig {
    /// Parsed socket address
    pub address: ConnectionSpec,
    /// Resolved TLS identity, used for `tls://` addresses
    pub tls: TlsProfile,
    /// TLS client name the node uses for outbound service connections
    pub tls_client: Option<String>,
    /// Per-candidate connect timeout
    pub connect_timeout: Duration,
    /// Maximum reply line length
    pub max_line_size: usize,
}

impl ControlConfig {
    /// Start building a configuration for an address
    pub fn builder(address: impl Into<String>) -> ControlConfigBuilder {
        ControlConfigBuilder::new(address)
    }

    /// Plain configuration for an address, without TLS material
    pub fn new(address: &str) -> Result<Self> {
        Self::builder(address).build()
    }

    /// Configuration for the address in `RECEPTORCTL_SOCKET`
    pub fn from_env() -> Result<Self> {
        let address = std::env::var(SOCKET_ENV_VAR).map_err(|_| {
            ReceptorctlError::Transport(receptorctl_transport::TransportError::MalformedAddress(
                format!("{} is not set", SOCKET_ENV_VAR),
            ))
        })?;
        Self::new(&address)
    }
}

/// Builder for [`ControlConfig`]
#[derive(Debug, Clone)]
pub struct ControlConfigBuilder {
    /// Raw socket address
    address: String,
    /// Explicit TLS material
    tls: TlsProfile,
    /// Profile file to look the TLS client up in
    profile_file: Option<PathBuf>,
    /// TLS client name
    tls_client: Option<String>,
    /// Connect timeout
    connect_timeout: Duration,
    /// Maximum reply line length
    max_line_size: usize,
}

impl ControlConfigBuilder {
    /// Create a new builder
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            tls: TlsProfile::default(),
            profile_file: None,
            tls_client: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_line_size: MAX_LINE_SIZE,
        }
    }

    /// Set the root CA bundle
    pub fn with_root_cas(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls.root_cas = Some(path.into());
        self
    }

    /// Set the client key and certificate
    pub fn with_client_cert(mut self, key: impl Into<PathBuf>, cert: impl Into<PathBuf>) -> Self {
        self.tls.client_key = Some(key.into());
        self.tls.client_cert = Some(cert.into());
        self
    }

    /// Skip hostname verification
    pub fn with_insecure_skip_verify(mut self, skip: bool) -> Self {
        self.tls.skip_verify = skip;
        self
    }

    /// Set the TLS client name
    pub fn with_tls_client(mut self, name: impl Into<String>) -> Self {
        self.tls_client = Some(name.into());
        self
    }

    /// Resolve TLS material from a profile file, by the TLS client name
    pub fn with_profile_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.profile_file = Some(path.into());
        self
    }

    /// Set connection timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set maximum reply line length
    pub fn with_max_line_size(mut self, max_line_size: usize) -> Self {
        self.max_line_size = max_line_size;
        self
    }

    /// Validate and build the configuration
    ///
    /// Parses the address and resolves the TLS profile; nothing is dialed.
    pub fn build(self) -> Result<ControlConfig> {
        let address = ConnectionSpec::parse(&self.address)?;
        let tls = TlsProfile::resolve(
            self.tls,
            self.profile_file.as_deref(),
            self.tls_client.as_deref(),
        )?;

        Ok(ControlConfig {
            address,
            tls,
            tls_client: self.tls_client,
            connect_timeout: self.connect_timeout,
            max_line_size: self.max_line_size,
        })
    }
}
