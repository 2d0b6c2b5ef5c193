//! Unit-of-work schema
//!
//! The same status record is written by the worker runtime into a unit's
//! `status` file and reported back by `work status` / `work list`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Lifecycle state of a work unit, encoded as an integer on disk and on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum WorkState {
    /// Created, waiting for input or a worker
    #[default]
    Pending,
    /// Worker running
    Running,
    /// Finished successfully
    Succeeded,
    /// Finished with an error, cancelled or killed
    Failed,
}

impl WorkState {
    /// Whether the state is terminal
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Human-readable name, as reported in `StateName`
    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for WorkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<WorkState> for i64 {
    fn from(state: WorkState) -> Self {
        match state {
            WorkState::Pending => 0,
            WorkState::Running => 1,
            WorkState::Succeeded => 2,
            WorkState::Failed => 3,
        }
    }
}

impl TryFrom<i64> for WorkState {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Running),
            2 => Ok(Self::Succeeded),
            3 => Ok(Self::Failed),
            other => Err(format!("unknown work state {}", other)),
        }
    }
}

/// Contents of a unit directory's `status` file
///
/// Fields this crate does not model are kept in `extra` so that rewriting the
/// file never drops data owned by the node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusFileData {
    /// Current state
    #[serde(default)]
    pub state: WorkState,
    /// Human-readable detail
    #[serde(default)]
    pub detail: String,
    /// Byte size of the unit's `stdout` file
    #[serde(default)]
    pub stdout_size: u64,
    /// Work type the unit was created with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_type: Option<String>,
    /// Work-type specific data
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub extra_data: Value,
    /// Fields not modelled above
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StatusFileData {
    /// Stamp a new state, detail and output size
    pub fn update(&mut self, state: WorkState, detail: impl Into<String>, stdout_size: u64) {
        self.state = state;
        self.detail = detail.into();
        self.stdout_size = stdout_size;
    }
}

/// A unit's status as reported by `work status` and `work list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkStatus {
    /// Current state
    pub state: WorkState,
    /// Name of the current state
    #[serde(default)]
    pub state_name: String,
    /// Human-readable detail
    #[serde(default)]
    pub detail: String,
    /// Bytes of output produced so far
    #[serde(default)]
    pub stdout_size: u64,
    /// Work type
    #[serde(default)]
    pub work_type: String,
    /// Work-type specific data
    #[serde(default)]
    pub extra_data: Value,
}

/// Final reply of a work submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResult {
    /// Outcome text, e.g. `Job Started`
    pub result: String,
    /// Identifier of the created unit
    #[serde(rename = "unitid")]
    pub unit_id: String,
}

/// Reply of a `ping` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PingResult {
    /// Whether the ping was answered
    pub success: bool,
    /// Node that answered
    #[serde(default)]
    pub from: Option<String>,
    /// Round trip time in nanoseconds
    #[serde(default)]
    pub time: Option<u64>,
    /// Round trip time as text
    #[serde(default)]
    pub time_str: Option<String>,
    /// Failure reason
    #[serde(default)]
    pub error: Option<String>,
}
