//! Termination signals

use std::future::Future;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

/// Install SIGINT and SIGTERM handlers
///
/// Handlers are installed immediately; the returned future resolves with the
/// number of the first signal received.
pub fn termination_signal() -> std::io::Result<impl Future<Output = i32>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    Ok(async move {
        let kind = tokio::select! {
            _ = sigint.recv() => SignalKind::interrupt(),
            _ = sigterm.recv() => SignalKind::terminate(),
        };
        let number = kind.as_raw_value();
        info!("Received signal {}", number);
        number
    })
}
