//! Error types for the worker runtime

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while setting up or running a work plugin
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The plugin directive is not `namespace:action`
    #[error("Plugin directive must be of the form namespace:function, got {0:?}")]
    InvalidDirective(String),

    /// A file the node must prepare is missing from the unit directory
    #[error("{name} file does not exist in {}", .dir.display())]
    MissingFile {
        /// File name within the unit directory
        name: &'static str,
        /// Unit directory
        dir: PathBuf,
    },

    /// No plugin is registered under the namespace
    #[error("Plugin {0} not found")]
    PluginNotFound(String),

    /// The plugin has no action with this name
    #[error("Function {action} does not exist in {namespace}")]
    ActionNotFound {
        /// Plugin namespace
        namespace: String,
        /// Requested action
        action: String,
    },

    /// The action exists but is not exported
    #[error("Not allowed to call non-exported {action} in {namespace}")]
    NotExported {
        /// Plugin namespace
        namespace: String,
        /// Requested action
        action: String,
    },

    /// `run` was called before a successful `load`
    #[error("Worker plugin has not been loaded")]
    NotLoaded,

    /// The output sink's consumer is gone
    #[error("Output sink is closed")]
    SinkClosed,

    /// The status file could not be read or parsed
    #[error("Invalid status file {}: {message}", .path.display())]
    StatusRead {
        /// Status file path
        path: PathBuf,
        /// Failure description
        message: String,
    },

    /// The status file could not be written
    #[error("Error saving status to {}: {source}", .path.display())]
    StatusWrite {
        /// Status file path
        path: PathBuf,
        /// Underlying failure
        source: std::io::Error,
    },

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    /// Whether this error means the runtime could not record a status
    pub fn is_status_write(&self) -> bool {
        matches!(self, Self::StatusWrite { .. })
    }
}
