//! Control connection and simple commands

use crate::{ControlConfig, ReceptorctlError, Result};
use receptorctl_proto::{parse_banner, parse_reply, ControlCommand, LineCodec, PingResult, ProtocolError, WorkStatus};
use receptorctl_transport::{transport_for, ControlStream};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Connection state
#[derive(Debug)]
enum ConnectionState {
    /// Not dialed yet
    Unconnected,
    /// Stream established and handshake completed
    Connected(Channel),
    /// Closed, handed to a streaming exchange, or failed the handshake
    Closed,
}

/// A handshaked, line-framed control stream
#[derive(Debug)]
pub(crate) struct Channel {
    pub(crate) stream: ControlStream,
    pub(crate) codec: LineCodec,
    pub(crate) remote_node: String,
}

impl Channel {
    /// Read the banner from a fresh stream
    ///
    /// On failure the stream is shut down and dropped.
    pub(crate) async fn handshake(mut stream: ControlStream, mut codec: LineCodec) -> Result<Self> {
        let banner = codec.read_line(&mut stream).await;
        let node = match banner {
            Ok(Some(line)) => parse_banner(&line),
            Ok(None) => Err(ProtocolError::HandshakeFailed(String::new())),
            Err(e) => Err(e),
        };

        match node {
            Ok(remote_node) => {
                info!("Handshake complete with node {}", remote_node);
                Ok(Self { stream, codec, remote_node })
            }
            Err(e) => {
                warn!("Handshake failed: {}", e);
                let _ = stream.shutdown().await;
                Err(e.into())
            }
        }
    }

    pub(crate) async fn write_line(&mut self, line: &str) -> Result<()> {
        debug!("-> {}", line.trim_end());
        self.codec.write_line(&mut self.stream, line).await?;
        Ok(())
    }

    /// Read one line; end-of-stream is an error here
    pub(crate) async fn read_line(&mut self) -> Result<String> {
        let line = self
            .codec
            .read_line(&mut self.stream)
            .await?
            .ok_or(ProtocolError::UnexpectedEof)?;
        debug!("<- {}", line);
        Ok(line)
    }

    pub(crate) async fn read_reply(&mut self) -> Result<Value> {
        let line = self.read_line().await?;
        Ok(parse_reply(&line)?)
    }

    pub(crate) async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("Error shutting down control stream: {}", e);
        }
    }
}

/// A client connection to a node's control socket
///
/// Connections are single-use: the stream is dialed lazily on the first
/// command (or explicitly with [`connect`](Self::connect)), any number of
/// simple commands may follow, and the streaming exchanges consume the
/// connection.
#[derive(Debug)]
pub struct ReceptorControl {
    /// Connection configuration
    config: ControlConfig,
    /// Lifecycle state
    state: ConnectionState,
}

impl ReceptorControl {
    /// Create an unconnected client
    pub fn new(config: ControlConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Unconnected,
        }
    }

    /// Handshake over an already established stream
    pub async fn from_stream(config: ControlConfig, stream: ControlStream) -> Result<Self> {
        let codec = LineCodec::with_max_line_size(config.max_line_size);
        Self::from_parts(config, stream, codec).await
    }

    pub(crate) async fn from_parts(config: ControlConfig, stream: ControlStream, codec: LineCodec) -> Result<Self> {
        let channel = Channel::handshake(stream, codec).await?;
        Ok(Self {
            config,
            state: ConnectionState::Connected(channel),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Node ID announced in the handshake banner
    pub fn remote_node(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Connected(channel) => Some(&channel.remote_node),
            _ => None,
        }
    }

    /// Whether the connection is handshaked and usable
    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected(_))
    }

    /// Whether the connection has been closed
    pub fn is_closed(&self) -> bool {
        matches!(self.state, ConnectionState::Closed)
    }

    /// Dial the control socket and perform the handshake
    pub async fn connect(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Connected(_) => return Err(ReceptorctlError::AlreadyConnected),
            ConnectionState::Closed => return Err(ReceptorctlError::ConnectionClosed),
            ConnectionState::Unconnected => {}
        }

        let transport = transport_for(&self.config.address, &self.config.tls, self.config.connect_timeout)?;
        debug!("Connecting to {}", transport.connection_info().address);
        let stream = transport.connect().await?;

        let codec = LineCodec::with_max_line_size(self.config.max_line_size);
        match Channel::handshake(stream, codec).await {
            Ok(channel) => {
                self.state = ConnectionState::Connected(channel);
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Closed;
                Err(e)
            }
        }
    }

    /// Get the channel, connecting first if needed
    async fn channel(&mut self) -> Result<&mut Channel> {
        if matches!(self.state, ConnectionState::Unconnected) {
            self.connect().await?;
        }
        match &mut self.state {
            ConnectionState::Connected(channel) => Ok(channel),
            _ => Err(ReceptorctlError::ConnectionClosed),
        }
    }

    /// Take the channel out for a streaming exchange, leaving the connection closed
    pub(crate) async fn take_channel(&mut self) -> Result<Channel> {
        self.channel().await?;
        match std::mem::replace(&mut self.state, ConnectionState::Closed) {
            ConnectionState::Connected(channel) => Ok(channel),
            _ => Err(ReceptorctlError::ConnectionClosed),
        }
    }

    /// Send a raw command line and parse the JSON reply
    pub async fn simple_command(&mut self, command: impl AsRef<str>) -> Result<Value> {
        let channel = self.channel().await?;
        channel.write_line(command.as_ref()).await?;
        channel.read_reply().await
    }

    /// Send a JSON command object and parse the JSON reply
    pub async fn simple_command_json<T: Serialize>(&mut self, command: &T) -> Result<Value> {
        let line = serde_json::to_string(command).map_err(ProtocolError::from)?;
        self.simple_command(line).await
    }

    /// Send a control command and parse the JSON reply
    pub async fn command(&mut self, command: &ControlCommand) -> Result<Value> {
        self.simple_command(command.to_string()).await
    }

    /// Node status
    pub async fn status(&mut self) -> Result<Value> {
        self.command(&ControlCommand::Status).await
    }

    /// Ping a node
    pub async fn ping(&mut self, node: &str) -> Result<PingResult> {
        let reply = self.command(&ControlCommand::Ping { node: node.to_string() }).await?;
        Ok(serde_json::from_value(reply).map_err(ProtocolError::from)?)
    }

    /// Trace the route to a node
    pub async fn traceroute(&mut self, node: &str) -> Result<Value> {
        self.command(&ControlCommand::Traceroute { node: node.to_string() }).await
    }

    /// Reload the node configuration
    pub async fn reload(&mut self) -> Result<Value> {
        self.command(&ControlCommand::Reload).await
    }

    /// Purge stale state on the node
    pub async fn purge(&mut self) -> Result<Value> {
        self.command(&ControlCommand::Purge).await
    }

    /// List known work units by ID
    pub async fn work_list(&mut self) -> Result<BTreeMap<String, WorkStatus>> {
        let reply = self.command(&ControlCommand::WorkList).await?;
        Ok(serde_json::from_value(reply).map_err(ProtocolError::from)?)
    }

    /// Status of one work unit
    pub async fn work_status(&mut self, unit_id: &str) -> Result<WorkStatus> {
        let reply = self
            .command(&ControlCommand::WorkStatus { unit_id: unit_id.to_string() })
            .await?;
        Ok(serde_json::from_value(reply).map_err(ProtocolError::from)?)
    }

    /// Cancel a work unit
    pub async fn work_cancel(&mut self, unit_id: &str) -> Result<Value> {
        self.command(&ControlCommand::WorkCancel { unit_id: unit_id.to_string() })
            .await
    }

    /// Release a work unit
    ///
    /// With `force` the node drops its record even when the remote side of the
    /// unit cannot be reached; the reply is returned as the node sent it.
    pub async fn work_release(&mut self, unit_id: &str, force: bool) -> Result<Value> {
        self.command(&ControlCommand::WorkRelease {
            unit_id: unit_id.to_string(),
            force,
        })
        .await
    }

    /// Poll `work status` until `done` holds
    pub async fn wait_for_work<F>(
        &mut self,
        unit_id: &str,
        done: F,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<WorkStatus>
    where
        F: Fn(&WorkStatus) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.work_status(unit_id).await?;
            if done(&status) {
                return Ok(status);
            }
            if Instant::now() + poll_interval > deadline {
                return Err(ReceptorctlError::WaitTimeout(unit_id.to_string()));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Close the connection
    ///
    /// Safe to call repeatedly; only the first call releases the stream.
    pub async fn close(&mut self) {
        if let ConnectionState::Connected(channel) = std::mem::replace(&mut self.state, ConnectionState::Closed) {
            debug!("Closing connection to {}", channel.remote_node);
            channel.close().await;
        }
        self.state = ConnectionState::Closed;
    }
}
