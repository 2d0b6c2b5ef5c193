//! Control commands and reply parsing
//!
//! Requests are single lines. Simple replies are a JSON document or an
//! `ERROR:` sentinel; the streaming exchanges are acknowledged by fixed text
//! lines matched here.

use crate::ProtocolError;
use serde_json::Value;
use std::fmt;

/// Prefix of the banner a node sends right after accepting a connection
pub const BANNER_PREFIX: &str = "Receptor Control, node ";

/// Prefix marking an application-level failure reply
pub const ERROR_PREFIX: &str = "ERROR:";

/// Prefix of a successful connect-to-service reply
pub const CONNECTING_PREFIX: &str = "Connecting";

const SUBMIT_ACK_PREFIX: &str = "Work unit created with ID ";
const SUBMIT_ACK_SUFFIX: &str = ". Send stdin data and EOF.";
const RESULTS_ACK_PREFIX: &str = "Streaming results for work unit ";

/// Line-form control commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Node status
    Status,
    /// Ping a node on the mesh
    Ping {
        /// Target node
        node: String,
    },
    /// Trace the route to a node
    Traceroute {
        /// Target node
        node: String,
    },
    /// Reload the node configuration
    Reload,
    /// Purge stale state on the node
    Purge,
    /// List known work units
    WorkList,
    /// Status of one work unit
    WorkStatus {
        /// Unit identifier
        unit_id: String,
    },
    /// Cancel a work unit
    WorkCancel {
        /// Unit identifier
        unit_id: String,
    },
    /// Release a work unit, optionally forcing it
    WorkRelease {
        /// Unit identifier
        unit_id: String,
        /// Release even if the remote side cannot be reached
        force: bool,
    },
    /// Stream a work unit's results
    WorkResults {
        /// Unit identifier
        unit_id: String,
        /// Byte offset into the unit's output
        start_pos: Option<u64>,
    },
    /// Connect to a service on a node
    Connect {
        /// Target node
        node: String,
        /// Service name on that node
        service: String,
        /// TLS client name the node should use
        tls_client: String,
    },
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status => write!(f, "status"),
            Self::Ping { node } => write!(f, "ping {}", node),
            Self::Traceroute { node } => write!(f, "traceroute {}", node),
            Self::Reload => write!(f, "reload"),
            Self::Purge => write!(f, "purge"),
            Self::WorkList => write!(f, "work list"),
            Self::WorkStatus { unit_id } => write!(f, "work status {}", unit_id),
            Self::WorkCancel { unit_id } => write!(f, "work cancel {}", unit_id),
            Self::WorkRelease { unit_id, force: false } => write!(f, "work release {}", unit_id),
            Self::WorkRelease { unit_id, force: true } => write!(f, "work force-release {}", unit_id),
            Self::WorkResults { unit_id, start_pos: None } => write!(f, "work results {}", unit_id),
            Self::WorkResults { unit_id, start_pos: Some(pos) } => {
                write!(f, "work results {} {}", unit_id, pos)
            }
            Self::Connect { node, service, tls_client } => {
                write!(f, "connect {} {} {}", node, service, tls_client)
            }
        }
    }
}

/// Extract the message of an `ERROR:` sentinel, if the line is one
pub fn error_message(line: &str) -> Option<&str> {
    line.strip_prefix(ERROR_PREFIX)
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
}

/// Parse the handshake banner and return the announced node ID
pub fn parse_banner(line: &str) -> Result<String, ProtocolError> {
    match line.strip_prefix(BANNER_PREFIX) {
        Some(node_id) if !node_id.is_empty() => Ok(node_id.to_string()),
        _ => Err(ProtocolError::HandshakeFailed(line.to_string())),
    }
}

/// Parse a simple command reply
pub fn parse_reply(line: &str) -> Result<Value, ProtocolError> {
    if let Some(message) = error_message(line) {
        return Err(ProtocolError::Remote(message.to_string()));
    }
    Ok(serde_json::from_str(line)?)
}

/// Parse the acknowledgement of a work submission and return the unit ID
pub fn parse_submit_ack(line: &str) -> Result<String, ProtocolError> {
    line.strip_prefix(SUBMIT_ACK_PREFIX)
        .and_then(|rest| rest.strip_suffix(SUBMIT_ACK_SUFFIX))
        .filter(|unit_id| !unit_id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProtocolError::SubmitFailed(error_message(line).map(str::to_string)))
}

/// Parse the acknowledgement of a results request and return the unit ID
pub fn parse_results_ack(line: &str) -> Result<String, ProtocolError> {
    line.strip_prefix(RESULTS_ACK_PREFIX)
        .filter(|unit_id| !unit_id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProtocolError::ResultsFailed(error_message(line).map(str::to_string)))
}

/// Check the reply to a connect-to-service request
pub fn parse_connect_ack(line: &str) -> Result<(), ProtocolError> {
    if line.starts_with(CONNECTING_PREFIX) {
        Ok(())
    } else {
        Err(ProtocolError::ConnectFailed(line.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_lines() {
        let cases = vec![
            (ControlCommand::Status, "status"),
            (ControlCommand::Ping { node: "node2".into() }, "ping node2"),
            (ControlCommand::Traceroute { node: "node3".into() }, "traceroute node3"),
            (ControlCommand::Reload, "reload"),
            (ControlCommand::Purge, "purge"),
            (ControlCommand::WorkList, "work list"),
            (ControlCommand::WorkStatus { unit_id: "u1".into() }, "work status u1"),
            (ControlCommand::WorkCancel { unit_id: "u1".into() }, "work cancel u1"),
            (ControlCommand::WorkRelease { unit_id: "u1".into(), force: false }, "work release u1"),
            (ControlCommand::WorkRelease { unit_id: "u1".into(), force: true }, "work force-release u1"),
            (ControlCommand::WorkResults { unit_id: "u1".into(), start_pos: None }, "work results u1"),
            (ControlCommand::WorkResults { unit_id: "u1".into(), start_pos: Some(42) }, "work results u1 42"),
            (
                ControlCommand::Connect { node: "n".into(), service: "control".into(), tls_client: String::new() },
                "connect n control ",
            ),
        ];

        for (command, expected) in cases {
            assert_eq!(command.to_string(), expected);
        }
    }

    #[test]
    fn test_parse_banner() {
        assert_eq!(parse_banner("Receptor Control, node nodeX").unwrap(), "nodeX");
        assert!(matches!(parse_banner("Receptor Control, node "), Err(ProtocolError::HandshakeFailed(_))));
        assert!(matches!(parse_banner("SSH-2.0-OpenSSH"), Err(ProtocolError::HandshakeFailed(_))));
        assert!(matches!(parse_banner(""), Err(ProtocolError::HandshakeFailed(_))));
    }

    #[test]
    fn test_parse_reply() {
        assert_eq!(parse_reply(r#"{"NodeID": "foo"}"#).unwrap(), json!({"NodeID": "foo"}));

        match parse_reply("ERROR: boom") {
            Err(ProtocolError::Remote(message)) => assert_eq!(message, "boom"),
            other => panic!("Expected remote error, got {:?}", other),
        }
        match parse_reply("ERROR:tight") {
            Err(ProtocolError::Remote(message)) => assert_eq!(message, "tight"),
            other => panic!("Expected remote error, got {:?}", other),
        }
        assert!(matches!(parse_reply("not json"), Err(ProtocolError::Json(_))));
    }

    #[test]
    fn test_parse_submit_ack() {
        let ack = "Work unit created with ID abc123. Send stdin data and EOF.";
        assert_eq!(parse_submit_ack(ack).unwrap(), "abc123");

        match parse_submit_ack("ERROR: unknown work type") {
            Err(ProtocolError::SubmitFailed(Some(message))) => assert_eq!(message, "unknown work type"),
            other => panic!("Expected submit failure, got {:?}", other),
        }
        assert!(matches!(parse_submit_ack("Work unit created"), Err(ProtocolError::SubmitFailed(None))));
    }

    #[test]
    fn test_parse_results_ack() {
        assert_eq!(parse_results_ack("Streaming results for work unit abc123").unwrap(), "abc123");
        assert!(matches!(
            parse_results_ack("ERROR: unknown work unit abc123"),
            Err(ProtocolError::ResultsFailed(Some(_)))
        ));
    }

    #[test]
    fn test_parse_connect_ack() {
        assert!(parse_connect_ack("Connecting").is_ok());
        assert!(matches!(
            parse_connect_ack("ERROR: no route to node"),
            Err(ProtocolError::ConnectFailed(_))
        ));
    }
}
