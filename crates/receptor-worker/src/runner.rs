//! Work plugin runner
//!
//! Runs one resolved action against a unit directory. The action executes
//! as its own task while a consumer task appends its output records to
//! `stdout` and restamps the status file after each one.

use crate::error::WorkerError;
use crate::registry::{OutputSink, Payload, PayloadKind, PluginRegistry, ResolvedAction};
use crate::unit::UnitDir;
use anyhow::Context;
use bytes::Bytes;
use receptorctl_proto::WorkState;
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::BufReader;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

/// Detail recorded before the plugin starts
pub const STARTING_DETAIL: &str = "Starting worker plugin";
/// Detail recorded while output is flowing
pub const RUNNING_DETAIL: &str = "Running";
/// Detail recorded on success
pub const COMPLETE_DETAIL: &str = "Complete";

/// Terminal result of a run, as recorded in the status file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// The action returned normally and all output was written
    Succeeded,
    /// Loading or running failed
    Failed {
        /// Recorded detail
        detail: String,
    },
    /// A termination signal arrived first
    Killed {
        /// Signal number
        signal: i32,
    },
}

impl WorkOutcome {
    /// State recorded for this outcome
    pub fn state(&self) -> WorkState {
        match self {
            Self::Succeeded => WorkState::Succeeded,
            Self::Failed { .. } | Self::Killed { .. } => WorkState::Failed,
        }
    }
}

/// Split a `namespace:action` directive
pub fn parse_directive(directive: &str) -> Result<(String, String), WorkerError> {
    match directive.split_once(':') {
        Some((namespace, action)) if !namespace.is_empty() && !action.is_empty() => {
            Ok((namespace.to_string(), action.to_string()))
        }
        _ => Err(WorkerError::InvalidDirective(directive.to_string())),
    }
}

/// Hosts one plugin action for one unit of work
#[derive(Debug)]
pub struct WorkPluginRunner {
    namespace: String,
    action: String,
    config: Value,
    unit: Arc<Mutex<UnitDir>>,
    shutting_down: Arc<AtomicBool>,
    loaded: Option<ResolvedAction>,
}

impl WorkPluginRunner {
    /// Validate the directive and open the unit directory
    pub async fn new(directive: &str, unitdir: impl AsRef<Path>, config: Value) -> Result<Self, WorkerError> {
        let (namespace, action) = parse_directive(directive)?;
        let unit = UnitDir::open(unitdir).await?;
        Ok(Self {
            namespace,
            action,
            config,
            unit: Arc::new(Mutex::new(unit)),
            shutting_down: Arc::new(AtomicBool::new(false)),
            loaded: None,
        })
    }

    /// Plugin namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Action name
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Resolve the directive against a registry
    pub fn load(&mut self, registry: &PluginRegistry) -> Result<(), WorkerError> {
        let resolved = registry.resolve(&self.namespace, &self.action)?;
        info!(
            "Loaded {}:{} ({:?} payload)",
            resolved.namespace, resolved.name, resolved.payload
        );
        self.loaded = Some(resolved);
        Ok(())
    }

    /// Load and run, recording failures in the status file
    ///
    /// Returns `Ok` once a terminal status has been written; `Err` only when
    /// the status itself could not be recorded.
    pub async fn execute<S>(mut self, registry: &PluginRegistry, shutdown: S) -> Result<WorkOutcome, WorkerError>
    where
        S: Future<Output = i32>,
    {
        if let Err(e) = self.load(registry) {
            return self.fail(format!("Error loading worker: {}", e)).await;
        }
        self.run_until(shutdown).await
    }

    /// Run the loaded action until it finishes or `shutdown` yields a signal
    pub async fn run_until<S>(self, shutdown: S) -> Result<WorkOutcome, WorkerError>
    where
        S: Future<Output = i32>,
    {
        let resolved = self.loaded.clone().ok_or(WorkerError::NotLoaded)?;
        let stdin_path = {
            let mut unit = self.unit.lock().await;
            unit.save(WorkState::Pending, STARTING_DETAIL).await?;
            unit.stdin_path().to_path_buf()
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(drain_output(self.unit.clone(), self.shutting_down.clone(), rx));
        let plugin = tokio::spawn(invoke(resolved, stdin_path, self.config.clone(), OutputSink::new(tx)));
        let plugin_abort = plugin.abort_handle();
        let consumer_abort = consumer.abort_handle();

        // Output is fully drained once every sink clone is dropped with the plugin task
        let work = async move { (plugin.await, consumer.await) };

        tokio::select! {
            biased;

            signal = shutdown => {
                self.shutting_down.store(true, Ordering::SeqCst);
                plugin_abort.abort();
                let detail = format!("Killed by signal {}", signal);
                warn!("{}", detail);
                let recorded = self.record(WorkState::Failed, &detail).await;
                consumer_abort.abort();
                recorded.map(|_| WorkOutcome::Killed { signal })
            }

            (plugin_result, drain_result) = work => {
                let failure = match plugin_result {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(format!("{:#}", e)),
                    Err(e) => Some(join_failure(e)),
                };
                let failure = failure.or(match drain_result {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(e) => Some(join_failure(e)),
                });

                match failure {
                    None => {
                        self.record(WorkState::Succeeded, COMPLETE_DETAIL).await?;
                        info!("Work complete");
                        Ok(WorkOutcome::Succeeded)
                    }
                    Some(message) => self.fail(format!("Error running worker: {}", message)).await,
                }
            }
        }
    }

    async fn record(&self, state: WorkState, detail: &str) -> Result<(), WorkerError> {
        self.unit.lock().await.save(state, detail).await
    }

    async fn fail(&self, detail: String) -> Result<WorkOutcome, WorkerError> {
        self.shutting_down.store(true, Ordering::SeqCst);
        warn!("{}", detail);
        self.record(WorkState::Failed, &detail).await?;
        Ok(WorkOutcome::Failed { detail })
    }
}

async fn invoke(action: ResolvedAction, stdin_path: PathBuf, config: Value, output: OutputSink) -> anyhow::Result<()> {
    let payload = load_payload(action.payload, &stdin_path)
        .await
        .with_context(|| format!("reading {}", stdin_path.display()))?;
    debug!("Invoking {}:{}", action.namespace, action.name);
    action.action.call(payload, config, output).await
}

async fn load_payload(kind: PayloadKind, path: &Path) -> std::io::Result<Payload> {
    Ok(match kind {
        PayloadKind::Bytes => Payload::Bytes(Bytes::from(tokio::fs::read(path).await?)),
        PayloadKind::Buffer => Payload::Buffer(BufReader::new(File::open(path).await?)),
        PayloadKind::File => Payload::File(path.to_path_buf()),
    })
}

/// Append queued records to `stdout` until every sender is gone
async fn drain_output(
    unit: Arc<Mutex<UnitDir>>,
    shutting_down: Arc<AtomicBool>,
    mut rx: mpsc::UnboundedReceiver<Value>,
) -> Result<(), WorkerError> {
    {
        let mut unit = unit.lock().await;
        if shutting_down.load(Ordering::SeqCst) {
            return Ok(());
        }
        unit.save(WorkState::Running, RUNNING_DETAIL).await?;
    }

    while let Some(item) = rx.recv().await {
        let mut line = serde_json::to_vec(&item)?;
        line.push(b'\n');

        let mut unit = unit.lock().await;
        if shutting_down.load(Ordering::SeqCst) {
            debug!("Discarding output after shutdown");
            break;
        }
        unit.append_stdout(&line).await?;
        unit.save(WorkState::Running, RUNNING_DETAIL).await?;
    }
    Ok(())
}

/// Drive `work` to completion on a dedicated multi-threaded runtime
///
/// The runtime is shut down in the background once `work` resolves, so a
/// killed plugin still occupying a blocking thread does not hold up exit.
pub fn block_on_detached<F: Future>(work: F) -> std::io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let output = runtime.block_on(work);
    runtime.shutdown_background();
    Ok(output)
}

fn join_failure(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let panic = error.into_panic();
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("plugin panicked: {}", message)
}
