//! On-disk unit of work

use crate::error::WorkerError;
use receptorctl_proto::{StatusFileData, WorkState};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Status file name within a unit directory
pub const STATUS_FILE: &str = "status";
/// Input file name within a unit directory
pub const STDIN_FILE: &str = "stdin";
/// Output file name within a unit directory
pub const STDOUT_FILE: &str = "stdout";

/// A unit directory prepared by the node
#[derive(Debug)]
pub struct UnitDir {
    dir: PathBuf,
    status_path: PathBuf,
    stdin_path: PathBuf,
    stdout_path: PathBuf,
    stdout: File,
    stdout_size: u64,
    status: StatusFileData,
}

impl UnitDir {
    /// Open a unit directory
    ///
    /// `status` and `stdin` must already exist. `stdout` is created with mode
    /// 0600 when absent and opened for appending.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, WorkerError> {
        let dir = dir.as_ref().to_path_buf();
        let status_path = dir.join(STATUS_FILE);
        let stdin_path = dir.join(STDIN_FILE);
        let stdout_path = dir.join(STDOUT_FILE);

        for (name, path) in [(STATUS_FILE, &status_path), (STDIN_FILE, &stdin_path)] {
            if !tokio::fs::try_exists(path).await? {
                return Err(WorkerError::MissingFile { name, dir });
            }
        }

        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o600)
            .open(&stdout_path)
            .await?;
        let stdout_size = stdout.metadata().await?.len();

        let contents = tokio::fs::read_to_string(&status_path).await?;
        let status = serde_json::from_str(&contents).map_err(|e| WorkerError::StatusRead {
            path: status_path.clone(),
            message: e.to_string(),
        })?;

        debug!("Opened unit directory {}", dir.display());
        Ok(Self {
            dir,
            status_path,
            stdin_path,
            stdout_path,
            stdout,
            stdout_size,
            status,
        })
    }

    /// Directory path
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the input file
    pub fn stdin_path(&self) -> &Path {
        &self.stdin_path
    }

    /// Path of the output file
    pub fn stdout_path(&self) -> &Path {
        &self.stdout_path
    }

    /// Bytes written to `stdout` so far
    pub fn stdout_size(&self) -> u64 {
        self.stdout_size
    }

    /// Last recorded status
    pub fn status(&self) -> &StatusFileData {
        &self.status
    }

    /// Append to `stdout`
    pub async fn append_stdout(&mut self, data: &[u8]) -> Result<u64, WorkerError> {
        self.stdout.write_all(data).await?;
        self.stdout.flush().await?;
        self.stdout_size = self.stdout.metadata().await?.len();
        Ok(self.stdout_size)
    }

    /// Record a state and detail along with the current output size
    ///
    /// Fields the runtime does not own are written back unchanged.
    pub async fn save(&mut self, state: WorkState, detail: impl Into<String>) -> Result<(), WorkerError> {
        self.status.update(state, detail, self.stdout_size);
        let data = serde_json::to_vec(&self.status)?;
        let (dir, status_path) = (self.dir.clone(), self.status_path.clone());
        tokio::task::spawn_blocking(move || replace_file(&dir, &status_path, &data))
            .await
            .map_err(std::io::Error::other)
            .and_then(|written| written)
            .map_err(|source| WorkerError::StatusWrite {
                path: self.status_path.clone(),
                source,
            })?;
        debug!("Status {} ({}): {}", state, self.stdout_size, self.status.detail);
        Ok(())
    }
}

/// Swap in new file contents with a rename so readers never see a partial file
///
/// The replacement keeps the permissions of the file it replaces.
fn replace_file(dir: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    if let Ok(metadata) = std::fs::metadata(path) {
        temp.as_file().set_permissions(metadata.permissions())?;
    }
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
