//! Shard logs through `journalctl --user`

use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::debug;

use super::UnitNaming;
use crate::domain::ErrorRecord;

/// Lines of a shard log; dropping the stream releases the underlying source
pub type LogStream = BoxStream<'static, Result<String, LogUnavailableError>>;

/// Why a shard log could not be read
#[derive(Debug, Error)]
pub enum LogUnavailableError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("no log history for {0}")]
    NoHistory(String),

    #[error("journalctl failed for {unit}: {stderr}")]
    Failed { unit: String, stderr: String },

    #[error("error reading log output: {0}")]
    Read(#[source] io::Error),
}

impl LogUnavailableError {
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Spawn { source, .. } => source.kind() == io::ErrorKind::NotFound,
            Self::NoHistory(_) | Self::Failed { .. } | Self::Read(_) => false,
        }
    }

    pub fn to_record(&self) -> ErrorRecord {
        if self.is_permanent() {
            ErrorRecord::permanent(self.to_string())
        } else {
            ErrorRecord::transient(self.to_string())
        }
    }
}

/// Source of per-shard log lines
#[async_trait]
pub trait LogSource: Send + Sync {
    /// The last `lines` lines of the shard log, then (with `follow`) new lines
    /// as they are written
    async fn tail(&self, shard: &str, lines: usize, follow: bool) -> Result<LogStream, LogUnavailableError>;
}

/// `journalctl --user` backed log source
#[derive(Debug, Clone)]
pub struct Journal {
    program: PathBuf,
    naming: UnitNaming,
}

/// Marker journalctl prints instead of lines when the unit has no entries
const NO_ENTRIES: &str = "-- No entries --";

impl Journal {
    pub fn new(naming: UnitNaming) -> Self {
        Self::with_program("journalctl", naming)
    }

    pub fn with_program(program: impl Into<PathBuf>, naming: UnitNaming) -> Self {
        let program = program.into();
        debug!(?program, "Journal::with_program: called");
        Self { program, naming }
    }

    fn command(&self, unit: &str, lines: usize, follow: bool) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["--user", "-u", unit, "-n", &lines.to_string(), "-o", "cat", "--no-pager"]);
        if follow {
            cmd.arg("-f");
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, source: io::Error) -> LogUnavailableError {
        LogUnavailableError::Spawn {
            program: self.program.display().to_string(),
            source,
        }
    }
}

/// Live journalctl process feeding a follow stream
///
/// The child is owned here so dropping the stream kills it.
struct Follow {
    unit: String,
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    stderr: Option<ChildStderr>,
    emitted: usize,
    done: bool,
}

impl Follow {
    async fn next_line(&mut self) -> Option<Result<String, LogUnavailableError>> {
        if self.done {
            return None;
        }
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) if line.trim() == NO_ENTRIES => {
                    if self.emitted > 0 {
                        continue;
                    }
                    // journalctl -f keeps running after the marker; nothing will follow
                    self.done = true;
                    if let Err(e) = self.child.start_kill() {
                        debug!(unit = %self.unit, error = %e, "Follow::next_line: journalctl already gone");
                    }
                    return Some(Err(LogUnavailableError::NoHistory(self.unit.clone())));
                }
                Ok(Some(line)) => {
                    self.emitted += 1;
                    return Some(Ok(line));
                }
                Ok(None) => {
                    self.done = true;
                    return self.finish().await.err().map(Err);
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(LogUnavailableError::Read(e)));
                }
            }
        }
    }

    /// Classify the end of output
    async fn finish(&mut self) -> Result<(), LogUnavailableError> {
        let status = self.child.wait().await.map_err(LogUnavailableError::Read)?;
        let mut stderr = String::new();
        if let Some(mut pipe) = self.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr).await;
        }
        debug!(unit = %self.unit, ?status, emitted = self.emitted, "Follow::finish: journalctl exited");

        if !status.success() {
            return Err(LogUnavailableError::Failed {
                unit: self.unit.clone(),
                stderr: stderr.trim().to_string(),
            });
        }
        if self.emitted == 0 {
            return Err(LogUnavailableError::NoHistory(self.unit.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl LogSource for Journal {
    async fn tail(&self, shard: &str, lines: usize, follow: bool) -> Result<LogStream, LogUnavailableError> {
        let unit = self.naming.unit(shard);
        debug!(%unit, lines, follow, "Journal::tail: called");

        let mut child = self.command(&unit, lines, follow).spawn().map_err(|e| self.spawn_error(e))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.spawn_error(io::Error::other("stdout not captured")))?;
        let stderr = child.stderr.take();

        let mut state = Follow {
            unit,
            child,
            lines: BufReader::new(stdout).lines(),
            stderr,
            emitted: 0,
            done: false,
        };

        if !follow {
            // Read eagerly so an empty or failed history surfaces as an error
            let mut collected = Vec::new();
            while let Some(item) = state.next_line().await {
                collected.push(item?);
            }
            return Ok(stream::iter(collected.into_iter().map(Ok)).boxed());
        }

        Ok(stream::unfold(state, |mut state| async move {
            let item = state.next_line().await?;
            Some((item, state))
        })
        .boxed())
    }
}
