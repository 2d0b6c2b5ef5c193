//! # Receptor Worker
//!
//! Runtime that hosts a work plugin for one unit of work. The node prepares
//! a unit directory with `status` and `stdin` files and starts the worker
//! with a `namespace:action` directive; the worker streams the action's
//! output records into `stdout` and keeps `status` current.

#![warn(missing_docs)]

/// Error types for the worker runtime
pub mod error;

/// Plugin registry, payload contracts and the output sink
pub mod registry;

/// On-disk unit of work
pub mod unit;

/// Work plugin runner
pub mod runner;

/// Built-in plugins
pub mod plugins;

/// Termination signals
pub mod signals;

pub use error::WorkerError;
pub use plugins::{builtin_registry, BUILTIN_NAMESPACE};
pub use registry::{OutputSink, Payload, PayloadKind, Plugin, PluginRegistry, WorkAction};
pub use runner::{block_on_detached, parse_directive, WorkOutcome, WorkPluginRunner};
pub use signals::termination_signal;
pub use unit::UnitDir;
