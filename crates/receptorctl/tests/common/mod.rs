//! Stub control node for integration tests
//!
//! Speaks enough of the control protocol to exercise the client: the banner,
//! `status`, `work status`, `work results` and JSON work submissions. Every
//! submitted payload is stored as that unit's results, so fetching a unit's
//! results echoes its stdin back.

#![allow(dead_code)]

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tokio::task::JoinHandle;

/// A fake node with shared unit storage
#[derive(Clone, Default)]
pub struct StubNode {
    node_id: String,
    units: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    requests: Arc<Mutex<Vec<String>>>,
    next_unit: Arc<AtomicUsize>,
}

impl StubNode {
    pub fn new(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            ..Default::default()
        }
    }

    /// Every request line received so far, across connections
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Stored stdin of a unit
    pub fn unit(&self, unit_id: &str) -> Option<Vec<u8>> {
        self.units.lock().unwrap().get(unit_id).cloned()
    }

    /// Pre-load results for a unit
    pub fn insert_unit(&self, unit_id: &str, data: &[u8]) {
        self.units.lock().unwrap().insert(unit_id.to_string(), data.to_vec());
    }

    /// Accept connections on a Unix socket
    pub fn serve_unix(&self, path: &Path) -> JoinHandle<()> {
        let listener = UnixListener::bind(path).unwrap();
        let node = self.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let node = node.clone();
                tokio::spawn(async move {
                    let _ = node.serve(socket).await;
                });
            }
        })
    }

    /// Accept plain TCP connections on a loopback port
    pub async fn serve_tcp(&self) -> (u16, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let node = self.clone();
        let handle = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let node = node.clone();
                tokio::spawn(async move {
                    let _ = node.serve(socket).await;
                });
            }
        });
        (port, handle)
    }

    /// Accept TLS connections on a loopback port
    pub async fn serve_tls(&self, acceptor: tokio_rustls::TlsAcceptor) -> (u16, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let node = self.clone();
        let handle = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let node = node.clone();
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    if let Ok(stream) = acceptor.accept(socket).await {
                        let _ = node.serve(stream).await;
                    }
                });
            }
        });
        (port, handle)
    }

    /// Run one control session
    pub async fn serve<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut stream = BufReader::new(stream);
        stream
            .write_all(format!("Receptor Control, node {}\n", self.node_id).as_bytes())
            .await?;

        loop {
            let mut line = String::new();
            if stream.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            let line = line.trim_end().to_string();
            self.requests.lock().unwrap().push(line.clone());

            if line.starts_with('{') {
                return self.submit(&mut stream, &line).await;
            }

            let words: Vec<&str> = line.split_whitespace().collect();
            match words.as_slice() {
                ["status"] => {
                    let reply = json!({"NodeID": self.node_id, "Connections": []});
                    write_line(&mut stream, &reply.to_string()).await?;
                }
                ["work", "status", unit_id] => {
                    let reply = match self.unit(unit_id) {
                        Some(data) => json!({
                            "State": 2,
                            "StateName": "Succeeded",
                            "Detail": "",
                            "StdoutSize": data.len(),
                            "WorkType": "echo",
                            "ExtraData": null,
                        })
                        .to_string(),
                        None => format!("ERROR: unknown work unit {}", unit_id),
                    };
                    write_line(&mut stream, &reply).await?;
                }
                ["work", "results", unit_id, rest @ ..] => {
                    let start: usize = match rest {
                        [pos] => pos.parse().context("bad start position")?,
                        _ => 0,
                    };
                    return self.results(&mut stream, unit_id, start).await;
                }
                _ => write_line(&mut stream, "ERROR: Unknown command").await?,
            }
        }
    }

    async fn submit<S>(&self, stream: &mut BufReader<S>, line: &str) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request: Value = serde_json::from_str(line)?;
        let work_type = request["worktype"].as_str().unwrap_or_default().to_string();
        if work_type == "reject" {
            return write_line(stream, "ERROR: Unknown work type reject").await;
        }

        let unit_id = format!("unit{}", self.next_unit.fetch_add(1, Ordering::SeqCst));
        let ack = format!("Work unit created with ID {}. Send stdin data and EOF.", unit_id);
        write_line(stream, &ack).await?;

        let payload = read_payload(stream).await?;

        if work_type == "fail" {
            return write_line(stream, "ERROR: payload rejected").await;
        }
        self.units.lock().unwrap().insert(unit_id.clone(), payload);
        let reply = json!({"result": "Job Started", "unitid": unit_id});
        write_line(stream, &reply.to_string()).await
    }

    async fn results<S>(&self, stream: &mut BufReader<S>, unit_id: &str, start: usize) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(data) = self.unit(unit_id) else {
            return write_line(stream, &format!("ERROR: unknown work unit {}", unit_id)).await;
        };
        if start > data.len() {
            bail!("start position past end of results");
        }
        write_line(stream, &format!("Streaming results for work unit {}", unit_id)).await?;
        stream.write_all(&data[start..]).await?;
        stream.shutdown().await?;
        Ok(())
    }
}

/// Read a submitted payload up to end-of-stream
///
/// A TLS client half-closes with a bare TCP FIN, which rustls reports as
/// `UnexpectedEof`; like the node, treat it as the end of the payload.
async fn read_payload<S>(stream: &mut BufReader<S>) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut payload = Vec::new();
    match stream.read_to_end(&mut payload).await {
        Ok(_) => Ok(payload),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(payload),
        Err(e) => Err(e.into()),
    }
}

async fn write_line<S>(stream: &mut BufReader<S>, line: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(format!("{}\n", line).as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// A CA and a server certificate signed by it
pub struct TestPki {
    pub ca_pem: String,
    pub server_cert: rustls::pki_types::CertificateDer<'static>,
    pub server_key: Vec<u8>,
}

impl TestPki {
    /// Generate a CA and a server certificate for `names`
    pub fn generate(names: &[&str]) -> Result<Self> {
        use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};

        let ca_key = KeyPair::generate()?;
        let mut ca_params = CertificateParams::new(Vec::<String>::new())?;
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca_cert = ca_params.self_signed(&ca_key)?;

        let server_key = KeyPair::generate()?;
        let server_params = CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())?;
        let server_cert = server_params.signed_by(&server_key, &ca_cert, &ca_key)?;

        Ok(Self {
            ca_pem: ca_cert.pem(),
            server_cert: server_cert.der().clone(),
            server_key: server_key.serialize_der(),
        })
    }

    /// Server-side acceptor presenting the generated certificate
    pub fn acceptor(&self) -> Result<tokio_rustls::TlsAcceptor> {
        use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.server_key.clone()));
        let config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(vec![self.server_cert.clone()], key)?;
        Ok(tokio_rustls::TlsAcceptor::from(Arc::new(config)))
    }

    /// Write the CA bundle to a file
    pub fn write_ca(&self, dir: &Path) -> Result<std::path::PathBuf> {
        let path = dir.join("ca.crt");
        std::fs::write(&path, &self.ca_pem)?;
        Ok(path)
    }
}

/// Wait until a condition on the node holds
pub async fn eventually<F: Fn() -> bool>(check: F) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}
