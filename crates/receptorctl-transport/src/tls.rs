//! TLS client profiles and rustls configuration

use crate::TransportError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Client-side TLS identity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsProfile {
    /// PEM bundle of trusted roots; the platform store is used when absent
    pub root_cas: Option<PathBuf>,
    /// PEM private key for client authentication
    pub client_key: Option<PathBuf>,
    /// PEM certificate chain for client authentication
    pub client_cert: Option<PathBuf>,
    /// Skip hostname verification (the chain is still verified)
    pub skip_verify: bool,
}

impl TlsProfile {
    /// Whether any explicit TLS material is set
    pub fn has_material(&self) -> bool {
        self.root_cas.is_some() || self.client_key.is_some() || self.client_cert.is_some()
    }

    /// Resolve the profile a caller asked for
    ///
    /// With no profile file the explicit profile is used as-is. With a profile
    /// file, a profile name is required and explicit material is rejected; the
    /// first matching record is overlaid on `explicit`.
    pub fn resolve(
        explicit: TlsProfile,
        profile_file: Option<&Path>,
        profile_name: Option<&str>,
    ) -> Result<TlsProfile, TransportError> {
        let Some(file) = profile_file else {
            return Ok(explicit);
        };
        if explicit.has_material() {
            return Err(TransportError::ConflictingConfig(
                "cannot specify both a TLS profile file and rootcas, key, cert".to_string(),
            ));
        }
        let Some(name) = profile_name else {
            return Err(TransportError::ConflictingConfig(
                "a TLS profile file requires a TLS client name".to_string(),
            ));
        };

        let contents = std::fs::read_to_string(file).map_err(|e| TransportError::ProfileFile {
            path: file.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_profile_yaml(explicit, &contents, name).map_err(|e| match e {
            TransportError::ProfileFile { message, .. } => TransportError::ProfileFile {
                path: file.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    /// Overlay the first `tls-client` record named `name` from YAML text
    pub fn from_profile_yaml(
        defaults: TlsProfile,
        yaml: &str,
        name: &str,
    ) -> Result<TlsProfile, TransportError> {
        let records: Vec<serde_yaml::Value> =
            serde_yaml::from_str(yaml).map_err(|e| TransportError::ProfileFile {
                path: PathBuf::new(),
                message: e.to_string(),
            })?;

        for record in records {
            let Some(entry) = record.get("tls-client") else {
                continue;
            };
            let entry: TlsClientRecord =
                serde_yaml::from_value(entry.clone()).map_err(|e| TransportError::ProfileFile {
                    path: PathBuf::new(),
                    message: e.to_string(),
                })?;
            if entry.name.as_deref() == Some(name) {
                debug!("Using TLS client profile {}", name);
                return Ok(entry.overlay(defaults));
            }
        }

        Err(TransportError::ProfileNotFound(name.to_string()))
    }

    /// Build the rustls client configuration for this profile
    pub fn client_config(&self) -> Result<Arc<ClientConfig>, TransportError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let roots = Arc::new(self.root_store()?);

        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| TransportError::Tls(format!("protocol versions: {}", e)))?;

        let builder = if self.skip_verify {
            let verifier = NoHostnameVerifier::new(roots, provider)?;
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(verifier))
        } else {
            builder.with_root_certificates(roots)
        };

        let config = match (&self.client_key, &self.client_cert) {
            (Some(key), Some(cert)) => {
                let certs = load_certificates(cert)?;
                let key = PrivateKeyDer::from_pem_file(key)
                    .map_err(|e| TransportError::Tls(format!("failed to load key {}: {}", key.display(), e)))?;
                builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| TransportError::Tls(format!("client certificate: {}", e)))?
            }
            _ => builder.with_no_client_auth(),
        };

        Ok(Arc::new(config))
    }

    fn root_store(&self) -> Result<RootCertStore, TransportError> {
        let mut store = RootCertStore::empty();
        match &self.root_cas {
            Some(path) => {
                for cert in load_certificates(path)? {
                    store
                        .add(cert)
                        .map_err(|e| TransportError::Tls(format!("failed to add root CA: {}", e)))?;
                }
            }
            None => {
                let native = rustls_native_certs::load_native_certs();
                for error in &native.errors {
                    warn!("Error loading platform certificate: {}", error);
                }
                let (added, ignored) = store.add_parsable_certificates(native.certs);
                debug!("Loaded {} platform root certificates ({} ignored)", added, ignored);
            }
        }
        if store.is_empty() {
            return Err(TransportError::Tls("no trusted root certificates".to_string()));
        }
        Ok(store)
    }
}

#[derive(Debug, Deserialize)]
struct TlsClientRecord {
    name: Option<String>,
    rootcas: Option<PathBuf>,
    key: Option<PathBuf>,
    cert: Option<PathBuf>,
    insecureskipverify: Option<bool>,
}

impl TlsClientRecord {
    fn overlay(self, defaults: TlsProfile) -> TlsProfile {
        TlsProfile {
            root_cas: self.rootcas.or(defaults.root_cas),
            client_key: self.key.or(defaults.client_key),
            client_cert: self.cert.or(defaults.client_cert),
            skip_verify: self.insecureskipverify.unwrap_or(defaults.skip_verify),
        }
    }
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let certs = CertificateDer::pem_file_iter(path)
        .and_then(|iter| iter.collect::<Result<Vec<_>, _>>())
        .map_err(|e| TransportError::Tls(format!("failed to load certificates {}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(TransportError::Tls(format!("no certificates found in {}", path.display())));
    }
    Ok(certs)
}

/// WebPKI verification that forgives a hostname mismatch and nothing else
#[derive(Debug)]
struct NoHostnameVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl NoHostnameVerifier {
    fn new(roots: Arc<RootCertStore>, provider: Arc<CryptoProvider>) -> Result<Self, TransportError> {
        let inner = WebPkiServerVerifier::builder_with_provider(roots, provider)
            .build()
            .map_err(|e| TransportError::Tls(format!("certificate verifier: {}", e)))?;
        Ok(Self { inner })
    }
}

fn is_name_mismatch(error: &rustls::Error) -> bool {
    matches!(
        error,
        rustls::Error::InvalidCertificate(
            CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. }
        )
    )
}

impl ServerCertVerifier for NoHostnameVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(e) if is_name_mismatch(&e) => {
                debug!("Ignoring hostname mismatch for {:?}", server_name);
                Ok(ServerCertVerified::assertion())
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const PROFILES: &str = r#"
- node:
    id: foo
- tls-client:
    name: other
    rootcas: /etc/other/ca.crt
- tls-client:
    name: client
    rootcas: /etc/receptor/ca.crt
    key: /etc/receptor/client.key
    cert: /etc/receptor/client.crt
    insecureskipverify: true
- tls-client:
    name: client
    rootcas: /never/used.crt
"#;

    #[test]
    fn test_first_matching_profile_wins() {
        let profile = TlsProfile::from_profile_yaml(TlsProfile::default(), PROFILES, "client").unwrap();
        assert_eq!(profile.root_cas, Some(PathBuf::from("/etc/receptor/ca.crt")));
        assert_eq!(profile.client_key, Some(PathBuf::from("/etc/receptor/client.key")));
        assert_eq!(profile.client_cert, Some(PathBuf::from("/etc/receptor/client.crt")));
        assert!(profile.skip_verify);
    }

    #[test]
    fn test_profile_overlays_only_present_fields() {
        let defaults = TlsProfile { skip_verify: true, ..Default::default() };
        let profile = TlsProfile::from_profile_yaml(defaults, PROFILES, "other").unwrap();
        assert_eq!(profile.root_cas, Some(PathBuf::from("/etc/other/ca.crt")));
        assert_eq!(profile.client_key, None);
        assert!(profile.skip_verify);
    }

    #[test]
    fn test_profile_not_found() {
        let result = TlsProfile::from_profile_yaml(TlsProfile::default(), PROFILES, "missing");
        assert!(matches!(result, Err(TransportError::ProfileNotFound(name)) if name == "missing"));
    }

    #[test]
    fn test_resolve_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(PROFILES.as_bytes()).unwrap();

        let profile = TlsProfile::resolve(TlsProfile::default(), Some(file.path()), Some("client")).unwrap();
        assert!(profile.skip_verify);
    }

    #[test]
    fn test_resolve_conflicts() {
        let explicit = TlsProfile {
            root_cas: Some(PathBuf::from("/ca.crt")),
            ..Default::default()
        };
        let result = TlsProfile::resolve(explicit, Some(Path::new("/profiles.yml")), Some("client"));
        assert!(matches!(result, Err(TransportError::ConflictingConfig(_))));

        let result = TlsProfile::resolve(TlsProfile::default(), Some(Path::new("/profiles.yml")), None);
        assert!(matches!(result, Err(TransportError::ConflictingConfig(_))));
    }

    #[test]
    fn test_resolve_without_file_keeps_explicit() {
        let explicit = TlsProfile {
            root_cas: Some(PathBuf::from("/ca.crt")),
            skip_verify: true,
            ..Default::default()
        };
        let profile = TlsProfile::resolve(explicit.clone(), None, Some("client")).unwrap();
        assert_eq!(profile, explicit);
    }

    #[test]
    fn test_unreadable_profile_file() {
        let result = TlsProfile::resolve(
            TlsProfile::default(),
            Some(Path::new("/nonexistent/profiles.yml")),
            Some("client"),
        );
        assert!(matches!(result, Err(TransportError::ProfileFile { .. })));
    }

    #[test]
    fn test_missing_root_ca_file() {
        let profile = TlsProfile {
            root_cas: Some(PathBuf::from("/nonexistent/ca.crt")),
            ..Default::default()
        };
        assert!(matches!(profile.client_config(), Err(TransportError::Tls(_))));
    }

    #[test]
    fn test_name_mismatch_detection() {
        assert!(is_name_mismatch(&rustls::Error::InvalidCertificate(
            CertificateError::NotValidForName
        )));
        assert!(!is_name_mismatch(&rustls::Error::InvalidCertificate(
            CertificateError::UnknownIssuer
        )));
        assert!(!is_name_mismatch(&rustls::Error::InvalidCertificate(CertificateError::Expired)));
        assert!(!is_name_mismatch(&rustls::Error::DecryptError));
    }
}
