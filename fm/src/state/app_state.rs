//! The aggregate root held by the state container

use tracing::debug;

use super::ui::{Mode, Selection};
use crate::domain::{ErrorRecord, ModEntry, ShardState, WorldStatus};

/// Everything the UI needs to draw one frame
///
/// The shard set is fixed when the container is built; mutations may change
/// shard fields but never add, remove or reorder shards.
#[derive(Debug, Clone, Default)]
pub struct AppState {
    /// Configured shards, in configured order
    pub shards: Vec<ShardState>,

    /// Latest world status; absent until the first successful query
    pub world: Option<WorldStatus>,
    pub world_error: Option<ErrorRecord>,

    /// Most recent chat log lines, oldest first
    pub chat: Vec<String>,
    pub chat_error: Option<ErrorRecord>,

    /// Mods listed in the cluster's overrides
    pub mods: Vec<ModEntry>,
    pub mods_error: Option<ErrorRecord>,

    /// User control actions currently in flight
    pub pending_actions: usize,

    pub selection: Selection,
    pub mode: Mode,

    /// Incremented exactly once per mutation
    pub version: u64,
}

impl AppState {
    /// Initial state for the given shard names
    pub fn new<S: AsRef<str>>(shard_names: &[S]) -> Self {
        debug!(count = shard_names.len(), "AppState::new: called");
        Self {
            shards: shard_names.iter().map(|n| ShardState::new(n.as_ref())).collect(),
            ..Default::default()
        }
    }

    /// Look up a shard by name
    pub fn shard(&self, name: &str) -> Option<&ShardState> {
        self.shards.iter().find(|s| s.name == name)
    }

    /// Mutable lookup, for use inside `StateContainer::mutate`
    pub fn shard_mut(&mut self, name: &str) -> Option<&mut ShardState> {
        self.shards.iter_mut().find(|s| s.name == name)
    }

    /// Configured shard names, in order
    pub fn shard_names(&self) -> impl Iterator<Item = &str> {
        self.shards.iter().map(|s| s.name.as_str())
    }

    /// Functional update of a single shard; unknown names leave the state as is
    pub fn with_shard(mut self, name: &str, update: impl FnOnce(&mut ShardState)) -> Self {
        match self.shard_mut(name) {
            Some(shard) => update(shard),
            None => debug!(%name, "AppState::with_shard: unknown shard, ignoring"),
        }
        self
    }

    /// The shard under the dashboard cursor
    pub fn selected_shard(&self) -> Option<&ShardState> {
        self.shards.get(self.selection.shard)
    }

    /// Number of shards currently reporting an error
    pub fn error_count(&self) -> usize {
        self.shards.iter().filter(|s| s.has_error()).count()
    }

    pub(crate) fn same_shard_set(&self, other: &AppState) -> bool {
        self.shards.len() == other.shards.len() && self.shard_names().eq(other.shard_names())
    }
}
