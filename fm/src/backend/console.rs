//! Game console access through the shard FIFO
//!
//! The server wrapper reads console commands from `dst-<shard>.fifo`. There is
//! no reply channel, so the response is whatever the shard appends to its
//! `server_log.txt` after the command was written.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::domain::ErrorRecord;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("console unavailable: {0}")]
    Connection(String),

    #[error("{0}")]
    Rejected(String),
}

impl QueryError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    pub fn to_record(&self) -> ErrorRecord {
        if self.is_permanent() {
            ErrorRecord::permanent(self.to_string())
        } else {
            ErrorRecord::transient(self.to_string())
        }
    }
}

/// errno when a FIFO is opened for writing and nobody holds the read end
const ENXIO: i32 = 6;

/// Sends console commands to a shard and captures the response text
#[async_trait]
pub trait GameQuery: Send + Sync {
    async fn query(&self, shard: &str, command: &str, timeout: Duration) -> Result<String, QueryError>;
}

/// Build the console command that broadcasts `message` to all players
pub fn announce_command(message: &str) -> String {
    let escaped = message.replace('\\', "\\\\").replace('"', "\\\"");
    format!("c_announce(\"{}\")", escaped)
}

/// Console FIFO writer with `server_log.txt` response capture
#[derive(Debug, Clone)]
pub struct FifoConsole {
    fifo_dir: PathBuf,
    cluster_dir: PathBuf,
    console_shard: String,
    quiet: Duration,
    poll: Duration,
}

impl FifoConsole {
    pub fn new(fifo_dir: impl Into<PathBuf>, cluster_dir: impl Into<PathBuf>, console_shard: impl Into<String>) -> Self {
        let fifo_dir = fifo_dir.into();
        let cluster_dir = cluster_dir.into();
        let console_shard = console_shard.into();
        debug!(?fifo_dir, ?cluster_dir, %console_shard, "FifoConsole::new: called");
        Self {
            fifo_dir,
            cluster_dir,
            console_shard,
            quiet: Duration::from_millis(750),
            poll: Duration::from_millis(100),
        }
    }

    /// How long the log must stay unchanged before the response is complete
    pub fn with_quiet_period(mut self, quiet: Duration) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn fifo_path(&self, shard: &str) -> PathBuf {
        self.fifo_dir.join(format!("dst-{}.fifo", shard))
    }

    pub fn log_path(&self, shard: &str) -> PathBuf {
        self.cluster_dir.join(shard).join("server_log.txt")
    }

    async fn write_command(&self, fifo: &Path, command: &str) -> Result<(), QueryError> {
        if !fifo.exists() {
            return Err(QueryError::Connection(format!("FIFO not found at {}", fifo.display())));
        }
        let mut sender = pipe::OpenOptions::new().open_sender(fifo).map_err(|e| match e.raw_os_error() {
            Some(ENXIO) => QueryError::Connection(format!("shard is not reading {}", fifo.display())),
            _ => QueryError::Connection(format!("failed to open {}: {}", fifo.display(), e)),
        })?;
        sender
            .write_all(format!("{}\n", command).as_bytes())
            .await
            .map_err(|e| QueryError::Connection(format!("failed to write to {}: {}", fifo.display(), e)))?;
        Ok(())
    }
}

async fn file_len(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

/// Bytes appended to `path` since `offset`; restarts at zero after truncation
async fn read_appended(path: &Path, offset: &mut u64) -> io::Result<String> {
    let len = file_len(path).await;
    if len < *offset {
        *offset = 0;
    }
    if len == *offset {
        return Ok(String::new());
    }
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(*offset)).await?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await?;
    *offset += buf.len() as u64;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[async_trait]
impl GameQuery for FifoConsole {
    async fn query(&self, shard: &str, command: &str, timeout: Duration) -> Result<String, QueryError> {
        debug!(%shard, %command, ?timeout, "FifoConsole::query: called");
        if shard != self.console_shard {
            return Err(QueryError::Rejected(format!(
                "commands can only be sent to the '{}' shard",
                self.console_shard
            )));
        }

        let log = self.log_path(shard);
        let mut offset = file_len(&log).await;
        let deadline = Instant::now() + timeout;

        self.write_command(&self.fifo_path(shard), command).await?;

        let mut response = String::new();
        let mut last_growth = Instant::now();
        loop {
            sleep(self.poll).await;
            let appended = read_appended(&log, &mut offset)
                .await
                .map_err(|e| QueryError::Connection(format!("failed to read {}: {}", log.display(), e)))?;
            let now = Instant::now();
            if !appended.is_empty() {
                response.push_str(&appended);
                last_growth = now;
            } else if !response.is_empty() && now.duration_since(last_growth) >= self.quiet {
                break;
            }
            if now >= deadline {
                break;
            }
        }

        debug!(%shard, bytes = response.len(), "FifoConsole::query: captured response");
        Ok(response)
    }
}
