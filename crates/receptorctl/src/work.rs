//! Work submission and result streaming
//!
//! Both exchanges take the connection by value: once the payload or the
//! results start flowing the stream is no longer line framed.

use crate::{ReceptorControl, ReceptorctlError, Result};
use bytes::Bytes;
use receptorctl_proto::{error_message, parse_results_ack, parse_submit_ack, ControlCommand, ProtocolError, SubmitResult};
use receptorctl_transport::ControlStream;
use serde_json::{Map, Value};
use std::io::Cursor;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, Chain, ReadBuf};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

/// Node a unit is submitted to when none is given
pub const DEFAULT_NODE: &str = "localhost";

/// Description of a unit of work to submit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkSubmission {
    /// Work type registered on the executing node
    pub work_type: String,
    /// Executing node, `localhost` when unset
    pub node: Option<String>,
    /// TLS client the node uses to reach a remote executor
    pub tls_client: Option<String>,
    /// Time to live, as accepted by the node (e.g. `1h`)
    pub ttl: Option<String>,
    /// Ask the node to sign the work request
    pub sign_work: bool,
    /// Extra parameters, in submission order
    pub params: Vec<(String, String)>,
}

impl WorkSubmission {
    /// Submission of a work type with no options
    pub fn new(work_type: impl Into<String>) -> Self {
        Self {
            work_type: work_type.into(),
            node: None,
            tls_client: None,
            ttl: None,
            sign_work: false,
            params: Vec::new(),
        }
    }

    /// Set the executing node
    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Set the TLS client name
    pub fn with_tls_client(mut self, tls_client: impl Into<String>) -> Self {
        self.tls_client = Some(tls_client.into());
        self
    }

    /// Set the time to live
    pub fn with_ttl(mut self, ttl: impl Into<String>) -> Self {
        self.ttl = Some(ttl.into());
        self
    }

    /// Request work signing
    pub fn with_sign_work(mut self, sign_work: bool) -> Self {
        self.sign_work = sign_work;
        self
    }

    /// Add a parameter
    ///
    /// A value of the form `@path` is replaced by the contents of that file
    /// when the command is built; `@@...` is sent as written.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Build the submit command object
    ///
    /// Keys are validated before any parameter file is read.
    pub async fn to_command(&self) -> Result<Map<String, Value>> {
        let mut command = Map::new();
        command.insert("command".into(), "work".into());
        command.insert("subcommand".into(), "submit".into());
        command.insert("node".into(), self.node.as_deref().unwrap_or(DEFAULT_NODE).into());
        command.insert("worktype".into(), self.work_type.clone().into());
        if let Some(tls_client) = self.tls_client.as_deref().filter(|s| !s.is_empty()) {
            command.insert("tlsclient".into(), tls_client.into());
        }
        if let Some(ttl) = self.ttl.as_deref().filter(|s| !s.is_empty()) {
            command.insert("ttl".into(), ttl.into());
        }
        if self.sign_work {
            command.insert("signwork".into(), "true".into());
        }

        let mut seen: Vec<&str> = command.keys().map(String::as_str).collect();
        for (key, _) in &self.params {
            if seen.contains(&key.as_str()) {
                return Err(ReceptorctlError::DuplicateParameter(key.clone()));
            }
            seen.push(key);
        }

        for (key, value) in &self.params {
            let value = match parameter_file(value) {
                Some(path) => {
                    let contents = tokio::fs::read_to_string(&path).await;
                    contents.map_err(|source| ReceptorctlError::ParameterFile { path, source })?
                }
                None => value.clone(),
            };
            command.insert(key.clone(), Value::String(value));
        }

        Ok(command)
    }
}

/// File named by an `@path` parameter value
fn parameter_file(value: &str) -> Option<PathBuf> {
    match value.strip_prefix('@') {
        Some(rest) if !rest.starts_with('@') => Some(PathBuf::from(rest)),
        _ => None,
    }
}

/// Payload streamed to the node after the submit acknowledgement
pub enum SubmitPayload {
    /// No payload
    Empty,
    /// Literal bytes
    Bytes(Bytes),
    /// Byte stream, copied until end-of-stream
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

impl std::fmt::Debug for SubmitPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Reader(_) => f.write_str("Reader"),
        }
    }
}

impl From<Bytes> for SubmitPayload {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for SubmitPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for SubmitPayload {
    fn from(bytes: &'static [u8]) -> Self {
        Self::Bytes(Bytes::from_static(bytes))
    }
}

impl From<String> for SubmitPayload {
    fn from(text: String) -> Self {
        Self::Bytes(Bytes::from(text))
    }
}

impl From<&'static str> for SubmitPayload {
    fn from(text: &'static str) -> Self {
        Self::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

impl From<tokio::fs::File> for SubmitPayload {
    fn from(file: tokio::fs::File) -> Self {
        Self::Reader(Box::new(file))
    }
}

impl SubmitPayload {
    /// Wrap any byte stream
    pub fn reader<R: AsyncRead + Send + Unpin + 'static>(reader: R) -> Self {
        Self::Reader(Box::new(reader))
    }

    async fn write_to(self, stream: &mut ControlStream) -> std::io::Result<u64> {
        match self {
            Self::Empty => Ok(0),
            Self::Bytes(bytes) => {
                stream.write_all(&bytes).await?;
                Ok(bytes.len() as u64)
            }
            Self::Reader(mut reader) => tokio::io::copy(&mut reader, stream).await,
        }
    }
}

/// Result bytes of a unit, streamed from the node
///
/// Yields whatever the node sends until it closes the stream. Dropping the
/// value closes the connection.
pub struct WorkResults {
    unit_id: String,
    reader: Chain<Cursor<Bytes>, ControlStream>,
}

impl WorkResults {
    /// Unit the results belong to
    pub fn unit_id(&self) -> &str {
        &self.unit_id
    }

    /// Read every remaining byte
    pub async fn read_all(mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.read_to_end(&mut out).await?;
        Ok(out)
    }

    /// Convert into a stream of byte chunks
    pub fn into_stream(self) -> ReaderStream<Self> {
        ReaderStream::new(self)
    }
}

impl std::fmt::Debug for WorkResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkResults").field("unit_id", &self.unit_id).finish()
    }
}

impl AsyncRead for WorkResults {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl ReceptorControl {
    /// Submit a unit of work and stream its payload
    ///
    /// The write direction is half-closed after the payload so the node sees
    /// end-of-input while its final reply can still be read. The connection
    /// is finished afterwards.
    pub async fn submit_work(
        mut self,
        submission: &WorkSubmission,
        payload: impl Into<SubmitPayload>,
    ) -> Result<SubmitResult> {
        let command = submission.to_command().await?;
        let line = serde_json::to_string(&command).map_err(ProtocolError::from)?;

        let mut channel = self.take_channel().await?;
        channel.write_line(&line).await?;

        let ack = channel.read_line().await?;
        let unit_id = match parse_submit_ack(&ack) {
            Ok(unit_id) => unit_id,
            Err(e) => {
                channel.close().await;
                return Err(e.into());
            }
        };
        info!("Work unit {} created on {}", unit_id, channel.remote_node);

        let payload: SubmitPayload = payload.into();
        let written = payload.write_to(&mut channel.stream).await?;
        channel.stream.shutdown_write().await?;
        debug!("Sent {} payload bytes for {}", written, unit_id);

        let reply = channel.read_line().await;
        channel.close().await;
        let reply = reply?;

        if let Some(message) = error_message(&reply) {
            return Err(ProtocolError::RemoteSubmitError(message.to_string()).into());
        }
        Ok(serde_json::from_str(&reply).map_err(ProtocolError::from)?)
    }

    /// Stream the results of a unit from the beginning
    pub async fn get_work_results(self, unit_id: &str) -> Result<WorkResults> {
        self.get_work_results_from(unit_id, None).await
    }

    /// Stream the results of a unit, optionally from a byte offset
    pub async fn get_work_results_from(mut self, unit_id: &str, start_pos: Option<u64>) -> Result<WorkResults> {
        let mut channel = self.take_channel().await?;
        let command = ControlCommand::WorkResults {
            unit_id: unit_id.to_string(),
            start_pos,
        };
        channel.write_line(&command.to_string()).await?;

        let ack = channel.read_line().await?;
        let unit_id = match parse_results_ack(&ack) {
            Ok(unit_id) => unit_id,
            Err(e) => {
                channel.close().await;
                return Err(e.into());
            }
        };
        channel.stream.shutdown_write().await?;
        info!("Streaming results for {}", unit_id);

        let buffered = channel.codec.take_buffered();
        Ok(WorkResults {
            unit_id,
            reader: Cursor::new(buffered).chain(channel.stream),
        })
    }
}
