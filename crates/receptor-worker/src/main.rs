//! Receptor worker binary
//!
//! Started by the node as `receptor-worker <namespace:action> <unitdir> <config-json>`.

use clap::error::ErrorKind;
use clap::Parser;
use receptor_worker::{block_on_detached, builtin_registry, termination_signal, WorkPluginRunner};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "receptor-worker", version, about = "Run a work plugin against a unit directory")]
struct Args {
    /// Plugin directive, `namespace:action`
    directive: String,
    /// Unit directory prepared by the node
    unitdir: PathBuf,
    /// JSON configuration handed to the plugin
    config: String,
}

fn main() -> ExitCode {
    // Standard output belongs to the node
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    match block_on_detached(run(args)) {
        Ok(code) => code,
        Err(e) => {
            error!("Error starting runtime: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> ExitCode {
    let config: Value = match serde_json::from_str(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Error initializing worker: invalid config JSON: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let runner = match WorkPluginRunner::new(&args.directive, &args.unitdir, config).await {
        Ok(runner) => runner,
        Err(e) => {
            error!("Error initializing worker: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let shutdown = match termination_signal() {
        Ok(shutdown) => shutdown,
        Err(e) => {
            error!("Error installing signal handlers: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let registry = builtin_registry();
    match runner.execute(&registry, shutdown).await {
        Ok(outcome) => {
            info!("Worker finished: {:?}", outcome);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error saving status: {}", e);
            ExitCode::FAILURE
        }
    }
}
