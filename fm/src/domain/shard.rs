//! Per-shard status as last observed by the status poll

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::ErrorRecord;
use super::unit::UnitStatus;

/// Last known state of one configured shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardState {
    /// Shard name, e.g. "Master" or "Caves"
    pub name: String,

    /// Process manager reports the unit active
    pub running: bool,

    /// Unit starts automatically
    pub enabled: bool,

    /// Time of the most recent successful status poll
    pub last_checked: Option<DateTime<Utc>>,

    /// Failure from the most recent status poll, cleared on the next success
    pub last_error: Option<ErrorRecord>,

    /// Failure from the most recent log follow, cleared when a follow starts
    pub log_error: Option<ErrorRecord>,
}

impl ShardState {
    /// A shard that has never been polled
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            running: false,
            enabled: false,
            last_checked: None,
            last_error: None,
            log_error: None,
        }
    }

    /// Apply a successful status poll
    ///
    /// `last_checked` never moves backwards, even if polls finish out of order.
    pub fn record_success(&mut self, status: UnitStatus, checked_at: DateTime<Utc>) {
        debug!(shard = %self.name, ?status, "ShardState::record_success: called");
        self.running = status.running;
        self.enabled = status.enabled;
        self.last_checked = match self.last_checked {
            Some(prev) if prev > checked_at => Some(prev),
            _ => Some(checked_at),
        };
        self.last_error = None;
    }

    /// Apply a failed status poll; the last known values are kept
    pub fn record_failure(&mut self, error: ErrorRecord) {
        debug!(shard = %self.name, %error, "ShardState::record_failure: called");
        self.last_error = Some(error);
    }

    /// True when the UI should show an error badge
    pub fn has_error(&self) -> bool {
        self.last_error.is_some()
    }
}
