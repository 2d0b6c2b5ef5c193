//! Control socket address grammar
//!
//! `unix://<path>` | `unix:<path>` | `<path>` | `tcp://<host>:<port>` |
//! `tls://<host>:<port>` (the `//` is optional for every scheme).

use crate::TransportError;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Where a control socket lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionSpec {
    /// Unix domain socket
    Unix {
        /// Socket path, with `~` expanded
        path: PathBuf,
    },
    /// TCP endpoint, optionally wrapped in TLS
    Tcp {
        /// Host name or IP literal (IPv6 without brackets)
        host: String,
        /// Port
        port: u16,
        /// Wrap the stream in TLS
        secure: bool,
    },
}

impl ConnectionSpec {
    /// Parse an address string
    pub fn parse(address: &str) -> Result<Self, TransportError> {
        if address.is_empty() {
            return Err(TransportError::MalformedAddress(address.to_string()));
        }

        if let Some((scheme, rest)) = split_scheme(address) {
            return match scheme {
                "unix" => Self::unix(address, rest),
                "tcp" => Self::tcp(address, rest, false),
                "tls" => Self::tcp(address, rest, true),
                _ => Err(TransportError::InvalidAddress(address.to_string())),
            };
        }

        if address.contains(':') {
            return Err(TransportError::InvalidAddress(address.to_string()));
        }
        Self::unix(address, address)
    }

    /// Whether the stream will be TLS-wrapped
    pub fn is_secure(&self) -> bool {
        matches!(self, Self::Tcp { secure: true, .. })
    }

    fn unix(address: &str, path: &str) -> Result<Self, TransportError> {
        if path.is_empty() || path.contains(':') {
            return Err(TransportError::MalformedAddress(address.to_string()));
        }
        Ok(Self::Unix { path: expand_home(path) })
    }

    fn tcp(address: &str, rest: &str, secure: bool) -> Result<Self, TransportError> {
        let malformed = || TransportError::MalformedAddress(address.to_string());

        let (host, port) = rest.rsplit_once(':').ok_or_else(malformed)?;
        let port = port.parse::<u16>().map_err(|_| malformed())?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        let valid_host = !host.is_empty()
            && host.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | ':'));
        if !valid_host {
            return Err(malformed());
        }

        Ok(Self::Tcp {
            host: host.to_string(),
            port,
            secure,
        })
    }
}

impl FromStr for ConnectionSpec {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(f, "unix://{}", path.display()),
            Self::Tcp { host, port, secure } => {
                let scheme = if *secure { "tls" } else { "tcp" };
                if host.contains(':') {
                    write!(f, "{}://[{}]:{}", scheme, host, port)
                } else {
                    write!(f, "{}://{}:{}", scheme, host, port)
                }
            }
        }
    }
}

/// Split `scheme:rest` or `scheme://rest` for alphabetic schemes
fn split_scheme(address: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = address.split_once(':')?;
    if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some((scheme, rest.strip_prefix("//").unwrap_or(rest)))
}

fn expand_home(path: &str) -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    match (path, home) {
        ("~", Some(home)) => home,
        (p, Some(home)) if p.starts_with("~/") => home.join(&p[2..]),
        (p, _) => PathBuf::from(p),
    }
}
