//! Game server updater script

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::Command;
use tracing::{debug, info};

use crate::domain::ErrorRecord;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("updater script not found at {0}")]
    NotFound(PathBuf),

    #[error("failed to run updater: {0}")]
    Spawn(#[source] io::Error),

    #[error("error reading updater output: {0}")]
    Read(#[source] io::Error),

    #[error("updater exited with {0}")]
    Exit(String),
}

impl UpdateError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn to_record(&self) -> ErrorRecord {
        if self.is_permanent() {
            ErrorRecord::permanent(self.to_string())
        } else {
            ErrorRecord::transient(self.to_string())
        }
    }
}

/// Runs the server update and reports its output line by line
#[async_trait]
pub trait Updater: Send + Sync {
    async fn run(&self, on_line: &mut (dyn FnMut(String) + Send)) -> Result<(), UpdateError>;
}

/// Runs an external update script, by default `~/.local/bin/dst-updater`
#[derive(Debug, Clone)]
pub struct ScriptUpdater {
    path: PathBuf,
}

impl ScriptUpdater {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        debug!(?path, "ScriptUpdater::new: called");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn next_line<R: AsyncBufRead + Unpin>(lines: &mut Option<Lines<R>>) -> Option<io::Result<String>> {
    lines.as_mut()?.next_line().await.transpose()
}

#[async_trait]
impl Updater for ScriptUpdater {
    async fn run(&self, on_line: &mut (dyn FnMut(String) + Send)) -> Result<(), UpdateError> {
        debug!(path = ?self.path, "ScriptUpdater::run: called");
        if !self.path.is_file() {
            return Err(UpdateError::NotFound(self.path.clone()));
        }

        let mut child = Command::new(&self.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(UpdateError::Spawn)?;

        let mut stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
        let mut stderr = child.stderr.take().map(|s| BufReader::new(s).lines());

        // Interleave both pipes until each is closed
        while stdout.is_some() || stderr.is_some() {
            let (from_stdout, line) = tokio::select! {
                line = next_line(&mut stdout), if stdout.is_some() => (true, line),
                line = next_line(&mut stderr), if stderr.is_some() => (false, line),
            };
            match line {
                Some(line) => on_line(line.map_err(UpdateError::Read)?),
                None if from_stdout => stdout = None,
                None => stderr = None,
            }
        }

        let status = child.wait().await.map_err(UpdateError::Read)?;
        info!(%status, "ScriptUpdater::run: updater finished");
        if status.success() {
            Ok(())
        } else {
            Err(UpdateError::Exit(status.to_string()))
        }
    }
}
