//! Built-in plugins

use crate::registry::{OutputSink, Payload, PayloadKind, Plugin, PluginRegistry};
use anyhow::{bail, Context};
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncBufReadExt;

/// Namespace of the built-in plugin
pub const BUILTIN_NAMESPACE: &str = "builtin";

#[derive(Debug, Serialize)]
struct CountRecord {
    bytes: usize,
    lines: usize,
}

#[derive(Debug, Serialize)]
struct StatRecord {
    path: String,
    size: u64,
}

/// One output record per input line
async fn echo(payload: Payload, _config: Value, output: OutputSink) -> anyhow::Result<()> {
    let Payload::Buffer(reader) = payload else {
        bail!("echo expects a buffer payload");
    };
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        output.put(&line)?;
    }
    Ok(())
}

/// Byte and line counts of the input
async fn count(payload: Payload, _config: Value, output: OutputSink) -> anyhow::Result<()> {
    let Payload::Bytes(data) = payload else {
        bail!("count expects a bytes payload");
    };
    let lines = data.iter().filter(|&&b| b == b'\n').count();
    output.put(&CountRecord {
        bytes: data.len(),
        lines,
    })?;
    Ok(())
}

/// Path and size of the input file
async fn stat(payload: Payload, _config: Value, output: OutputSink) -> anyhow::Result<()> {
    let Payload::File(path) = payload else {
        bail!("stat expects a file payload");
    };
    let metadata = tokio::fs::metadata(&path)
        .await
        .with_context(|| format!("stat {}", path.display()))?;
    output.put(&StatRecord {
        path: path.display().to_string(),
        size: metadata.len(),
    })?;
    Ok(())
}

async fn internal(_payload: Payload, config: Value, output: OutputSink) -> anyhow::Result<()> {
    output.put(&config)?;
    Ok(())
}

/// The `builtin` plugin
pub fn builtin_plugin() -> Plugin {
    Plugin::new()
        .export("echo", PayloadKind::Buffer, echo)
        .export("count", PayloadKind::Bytes, count)
        .export("stat", PayloadKind::File, stat)
        .internal("internal", internal)
}

/// Registry holding every built-in plugin
pub fn builtin_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register(BUILTIN_NAMESPACE, builtin_plugin());
    registry
}
