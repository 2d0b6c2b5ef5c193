//! Plugin registry, payload contracts and the output sink

use crate::error::WorkerError;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::debug;

/// How an action wants its input delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadKind {
    /// The whole `stdin` file read into memory
    #[default]
    Bytes,
    /// A buffered reader over the `stdin` file
    Buffer,
    /// The path of the `stdin` file
    File,
}

/// Input handed to an action
#[derive(Debug)]
pub enum Payload {
    /// Entire input
    Bytes(Bytes),
    /// Open reader over the input
    Buffer(BufReader<File>),
    /// Path of the input file
    File(PathBuf),
}

impl Payload {
    /// The contract this payload satisfies
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Bytes(_) => PayloadKind::Bytes,
            Self::Buffer(_) => PayloadKind::Buffer,
            Self::File(_) => PayloadKind::File,
        }
    }
}

/// Where an action puts its output records
///
/// Records are queued and written to the unit's `stdout` by a separate
/// consumer, one JSON line each.
#[derive(Debug, Clone)]
pub struct OutputSink {
    tx: mpsc::UnboundedSender<Value>,
}

impl OutputSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Value>) -> Self {
        Self { tx }
    }

    /// Queue one output record
    pub fn put<T: Serialize + ?Sized>(&self, item: &T) -> Result<(), WorkerError> {
        let value = serde_json::to_value(item)?;
        self.tx.send(value).map_err(|_| WorkerError::SinkClosed)
    }
}

/// A callable plugin action
#[async_trait]
pub trait WorkAction: Send + Sync {
    /// Process the payload, emitting records into `output`
    async fn call(&self, payload: Payload, config: Value, output: OutputSink) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> WorkAction for F
where
    F: Fn(Payload, Value, OutputSink) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn call(&self, payload: Payload, config: Value, output: OutputSink) -> anyhow::Result<()> {
        (self)(payload, config, output).await
    }
}

#[derive(Clone)]
struct ActionEntry {
    action: Arc<dyn WorkAction>,
    payload: PayloadKind,
    exported: bool,
}

/// A namespace of actions
#[derive(Clone, Default)]
pub struct Plugin {
    actions: HashMap<String, ActionEntry>,
}

impl Plugin {
    /// Create an empty plugin
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an action callable by directive
    pub fn export(mut self, name: impl Into<String>, payload: PayloadKind, action: impl WorkAction + 'static) -> Self {
        self.actions.insert(
            name.into(),
            ActionEntry {
                action: Arc::new(action),
                payload,
                exported: true,
            },
        );
        self
    }

    /// Add an action that directives may not call
    pub fn internal(mut self, name: impl Into<String>, action: impl WorkAction + 'static) -> Self {
        self.actions.insert(
            name.into(),
            ActionEntry {
                action: Arc::new(action),
                payload: PayloadKind::default(),
                exported: false,
            },
        );
        self
    }

    /// Names of the exported actions, sorted
    pub fn exported(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .actions
            .iter()
            .filter(|(_, entry)| entry.exported)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin").field("exported", &self.exported()).finish()
    }
}

/// An action resolved from a directive, ready to run
#[derive(Clone)]
pub struct ResolvedAction {
    /// Plugin namespace
    pub namespace: String,
    /// Action name
    pub name: String,
    /// Declared payload contract
    pub payload: PayloadKind,
    pub(crate) action: Arc<dyn WorkAction>,
}

impl std::fmt::Debug for ResolvedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedAction")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("payload", &self.payload)
            .finish()
    }
}

/// Plugins by namespace
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Plugin>,
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under a namespace, replacing any previous one
    pub fn register(&mut self, namespace: impl Into<String>, plugin: Plugin) {
        let namespace = namespace.into();
        debug!("Registered plugin {} ({:?})", namespace, plugin.exported());
        self.plugins.insert(namespace, plugin);
    }

    /// Look up an exported action
    pub fn resolve(&self, namespace: &str, action: &str) -> Result<ResolvedAction, WorkerError> {
        let plugin = self
            .plugins
            .get(namespace)
            .ok_or_else(|| WorkerError::PluginNotFound(namespace.to_string()))?;
        let entry = plugin.actions.get(action).ok_or_else(|| WorkerError::ActionNotFound {
            namespace: namespace.to_string(),
            action: action.to_string(),
        })?;
        if !entry.exported {
            return Err(WorkerError::NotExported {
                namespace: namespace.to_string(),
                action: action.to_string(),
            });
        }
        Ok(ResolvedAction {
            namespace: namespace.to_string(),
            name: action.to_string(),
            payload: entry.payload,
            action: entry.action.clone(),
        })
    }
}
