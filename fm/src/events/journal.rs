//! Event Journal - persists events to a JSONL file
//!
//! The journal subscribes to every event kind and appends one timestamped
//! JSON object per line. Useful for debugging what the coordinator did while
//! the TUI owned the terminal.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::bus::{EventBus, SubscriptionHandle};
use super::types::Event;

/// One line of the journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

impl JournalEntry {
    pub fn new(event: Event) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Append-only JSONL writer for bus events
#[derive(Debug)]
pub struct EventJournal {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl EventJournal {
    /// Open (or create) the journal at `path`, creating parent directories
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!(?path, "EventJournal::open: called");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .wrap_err_with(|| format!("Failed to open event journal {}", path.display()))?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Default location: `<data_local_dir>/fishmanager/events.jsonl`
    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir().ok_or_else(|| eyre::eyre!("Could not determine data directory"))?;
        Ok(data_dir.join("fishmanager").join("events.jsonl"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event
    pub fn write_event(&self, event: &Event) -> Result<()> {
        let entry = JournalEntry::new(event.clone());
        let json = serde_json::to_string(&entry)?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }

    /// Subscribe this journal to every event on `bus`
    pub fn attach(self, bus: &EventBus) -> Result<SubscriptionHandle> {
        debug!(path = ?self.path, "EventJournal::attach: called");
        let journal = Arc::new(self);
        bus.subscribe_all(move |event| journal.write_event(event))
    }
}

/// Read every entry of a journal file; unparseable lines are skipped
pub fn read_journal(path: impl AsRef<Path>) -> Result<Vec<JournalEntry>> {
    let path = path.as_ref();
    debug!(?path, "read_journal: called");

    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path).wrap_err_with(|| format!("Failed to read {}", path.display()))?;
    let mut entries = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(line, error = %e, "read_journal: failed to parse line"),
        }
    }

    debug!(count = entries.len(), "read_journal: loaded entries");
    Ok(entries)
}
