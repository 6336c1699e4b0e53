//! Collaborators the core talks to
//!
//! Each concern is a trait so the coordinator can be driven by fakes in tests.
//! The concrete implementations shell out to `systemctl`/`journalctl`, write
//! to the shard console FIFO and read files in the cluster directory.
//!
//! Every error type here can describe itself as an [`ErrorRecord`], which is
//! how failures end up stored in state.

mod console;
mod files;
mod journal;
#[cfg(test)]
pub mod mock;
mod sync;
mod systemd;
mod updater;

use std::sync::Arc;

pub use console::{FifoConsole, GameQuery, QueryError, announce_command};
pub use files::{ClusterDir, ClusterFiles, FilesError, parse_mod_overrides};
pub use journal::{Journal, LogSource, LogStream, LogUnavailableError};
pub use sync::{SyncStep, SyncTarget, sync_shards};
pub use systemd::{ProcessControl, ProcessControlError, Systemd};
pub use updater::{ScriptUpdater, UpdateError, Updater};

/// How shard names map to systemd unit names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitNaming {
    pub prefix: String,
    pub suffix: String,
}

impl UnitNaming {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    /// `dontstarve@Master.service` for shard `Master` with the default naming
    pub fn unit(&self, shard: &str) -> String {
        format!("{}{}{}", self.prefix, shard, self.suffix)
    }

    /// The shard a unit name belongs to; `None` for other units and the bare template
    pub fn shard<'a>(&self, unit: &'a str) -> Option<&'a str> {
        let shard = unit.strip_prefix(self.prefix.as_str())?.strip_suffix(self.suffix.as_str())?;
        if shard.is_empty() { None } else { Some(shard) }
    }

    /// Glob matching every instance unit
    pub fn pattern(&self) -> String {
        self.unit("*")
    }
}

impl Default for UnitNaming {
    fn default() -> Self {
        Self::new("dontstarve@", ".service")
    }
}

/// The full set of collaborators, shared by the coordinator and the CLI
#[derive(Clone)]
pub struct Backends {
    pub process: Arc<dyn ProcessControl>,
    pub logs: Arc<dyn LogSource>,
    pub query: Arc<dyn GameQuery>,
    pub files: Arc<dyn ClusterFiles>,
    pub updater: Arc<dyn Updater>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}
