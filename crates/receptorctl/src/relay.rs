//! Connect-to-service and raw relay

use crate::{ControlConfig, ReceptorControl, Result};
use bytes::Bytes;
use receptorctl_proto::{parse_connect_ack, ControlCommand, LineCodec};
use receptorctl_transport::ControlStream;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// Which side ended a relay session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// Local input reached end-of-stream
    Local,
    /// The remote service closed the stream
    Remote,
}

/// Byte counts of a finished relay session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes copied from local input to the service
    pub sent: u64,
    /// Bytes copied from the service to local output
    pub received: u64,
    /// Side that ended the session
    pub ended: RelayEnd,
}

/// A stream to a remote service, no longer framed by the control protocol
#[derive(Debug)]
pub struct ServiceConnection {
    config: ControlConfig,
    stream: ControlStream,
    codec: LineCodec,
}

impl ServiceConnection {
    /// Copy bytes both ways until either side reaches end-of-stream
    ///
    /// Each direction is copied independently, so a peer that stops reading
    /// never holds up traffic the other way. The sink of the direction that
    /// ended is shut down before returning.
    pub async fn relay<I, O>(mut self, mut input: I, mut output: O) -> Result<RelayStats>
    where
        I: AsyncRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let mut received = 0u64;
        let buffered = self.codec.take_buffered();
        if !buffered.is_empty() {
            output.write_all(&buffered).await?;
            output.flush().await?;
            received += buffered.len() as u64;
        }

        let mut sent = 0u64;
        let (mut remote_read, mut remote_write) = tokio::io::split(self.stream);
        let ended = {
            let outbound = copy_until_eof(&mut input, &mut remote_write, &mut sent);
            let inbound = copy_until_eof(&mut remote_read, &mut output, &mut received);
            tokio::select! {
                result = outbound => {
                    result?;
                    RelayEnd::Local
                }
                result = inbound => {
                    result?;
                    RelayEnd::Remote
                }
            }
        };

        debug!("Relay ended ({:?}): {} bytes sent, {} received", ended, sent, received);
        Ok(RelayStats { sent, received, ended })
    }

    /// Relay between the process's standard input and output
    pub async fn relay_stdio(self) -> Result<RelayStats> {
        self.relay(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Speak the control protocol to the remote service
    ///
    /// Used after connecting to a remote node's `control` service; the
    /// remote banner is read and checked like a local one.
    pub async fn into_control(self) -> Result<ReceptorControl> {
        ReceptorControl::from_parts(self.config, self.stream, self.codec).await
    }

    /// Release the stream together with any bytes read past the reply line
    pub fn into_parts(mut self) -> (ControlStream, Bytes) {
        let buffered = self.codec.take_buffered();
        (self.stream, buffered)
    }
}

async fn copy_until_eof<R, W>(reader: &mut R, writer: &mut W, copied: &mut u64) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            if let Err(e) = writer.shutdown().await {
                debug!("Error shutting down relay sink: {}", e);
            }
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *copied += n as u64;
    }
}

impl ReceptorControl {
    /// Ask the node to connect this stream to a service on another node
    ///
    /// The TLS client name falls back to the configured one, then to an
    /// empty name. Afterwards the stream carries the service's raw bytes.
    pub async fn connect_to_service(
        mut self,
        node: &str,
        service: &str,
        tls_client: Option<&str>,
    ) -> Result<ServiceConnection> {
        let tls_client = tls_client
            .map(str::to_string)
            .or_else(|| self.config().tls_client.clone())
            .unwrap_or_default();
        let command = ControlCommand::Connect {
            node: node.to_string(),
            service: service.to_string(),
            tls_client,
        };

        let mut channel = self.take_channel().await?;
        channel.write_line(&command.to_string()).await?;
        let reply = channel.read_line().await?;
        if let Err(e) = parse_connect_ack(&reply) {
            channel.close().await;
            return Err(e.into());
        }
        info!("Connected to service {} on {}", service, node);

        Ok(ServiceConnection {
            config: self.config().clone(),
            stream: channel.stream,
            codec: channel.codec,
        })
    }
}
