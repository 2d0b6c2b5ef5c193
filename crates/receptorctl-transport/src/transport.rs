//! Transport abstraction and implementations

use crate::{ConnectionSpec, ControlStream, TlsProfile, TransportError};
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream, UnixStream};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

/// Default per-candidate connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport abstraction for the different control socket kinds
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a stream to the control socket
    async fn connect(&self) -> Result<ControlStream, TransportError>;

    /// Get connection information
    fn connection_info(&self) -> ConnectionInfo;
}

/// Connection information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Address being dialed, in canonical form
    pub address: String,
    /// Connection type
    pub transport_type: TransportType,
}

/// Transport type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// Unix domain socket
    Unix,
    /// Plain TCP
    Tcp,
    /// TLS over TCP
    Tls,
}

/// Build the transport for a parsed address
///
/// The TLS context is only built for `tls://` addresses, so profile material
/// is loaded (and may fail) before any socket is opened.
pub fn transport_for(
    spec: &ConnectionSpec,
    tls: &TlsProfile,
    connect_timeout: Duration,
) -> Result<Box<dyn Transport>, TransportError> {
    match spec {
        ConnectionSpec::Unix { path } => Ok(Box::new(UnixTransport::new(path.clone()))),
        ConnectionSpec::Tcp { host, port, secure } => {
            let mut transport = TcpTransport::new(host.clone(), *port).with_timeout(connect_timeout);
            if *secure {
                transport = transport.with_tls(tls.client_config()?);
            }
            Ok(Box::new(transport))
        }
    }
}

/// Unix domain socket transport
#[derive(Debug, Clone)]
pub struct UnixTransport {
    path: PathBuf,
}

impl UnixTransport {
    /// Create a transport for a socket path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Transport for UnixTransport {
    async fn connect(&self) -> Result<ControlStream, TransportError> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Err(TransportError::PathNotFound(self.path.clone()));
        }

        debug!("Connecting to unix socket {}", self.path.display());
        let stream = UnixStream::connect(&self.path).await?;
        info!("Connected to {}", self.path.display());
        Ok(ControlStream::Unix(stream))
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            address: format!("unix://{}", self.path.display()),
            transport_type: TransportType::Unix,
        }
    }
}

/// TCP transport, optionally TLS-wrapped
#[derive(Clone)]
pub struct TcpTransport {
    host: String,
    port: u16,
    tls: Option<Arc<ClientConfig>>,
    connect_timeout: Duration,
}

impl TcpTransport {
    /// Create a plain TCP transport
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Wrap connections in TLS using this client configuration
    pub fn with_tls(mut self, config: Arc<ClientConfig>) -> Self {
        self.tls = Some(config);
        self
    }

    /// Set the per-candidate connect timeout
    pub fn with_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    async fn connect_candidate(
        &self,
        addr: SocketAddr,
        server_name: Option<&ServerName<'static>>,
    ) -> Result<ControlStream, std::io::Error> {
        let tcp = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;

        match (&self.tls, server_name) {
            (Some(config), Some(name)) => {
                let connector = TlsConnector::from(config.clone());
                let tls = timeout(self.connect_timeout, connector.connect(name.clone(), tcp))
                    .await
                    .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "TLS handshake timed out"))??;
                Ok(ControlStream::from(tls))
            }
            _ => Ok(ControlStream::Tcp(tcp)),
        }
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls.is_some())
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self) -> Result<ControlStream, TransportError> {
        let server_name = match &self.tls {
            Some(_) => Some(
                ServerName::try_from(self.host.clone())
                    .map_err(|e| TransportError::Tls(format!("invalid server name {}: {}", self.host, e)))?,
            ),
            None => None,
        };

        let mut last_error = None;
        let candidates: Vec<SocketAddr> = match lookup_host((self.host.as_str(), self.port)).await {
            Ok(addrs) => addrs.collect(),
            Err(e) => {
                last_error = Some(e.to_string());
                Vec::new()
            }
        };

        for addr in candidates {
            debug!("Trying {} for {}:{}", addr, self.host, self.port);
            match self.connect_candidate(addr, server_name.as_ref()).await {
                Ok(stream) => {
                    info!("Connected to {} ({})", addr, stream.kind());
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("Candidate {} failed: {}", addr, e);
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(TransportError::NoRouteToHost {
            host: self.host.clone(),
            port: self.port,
            last_error,
        })
    }

    fn connection_info(&self) -> ConnectionInfo {
        let spec = ConnectionSpec::Tcp {
            host: self.host.clone(),
            port: self.port,
            secure: self.tls.is_some(),
        };
        ConnectionInfo {
            address: spec.to_string(),
            transport_type: if self.tls.is_some() { TransportType::Tls } else { TransportType::Tcp },
        }
    }
}
