//! World status and mod listing captured from the running cluster

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A connected player as listed by `c_listallplayers()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Klei user id (KU_...)
    pub id: String,
    pub name: String,
    /// Character prefab, e.g. "wilson"
    pub character: String,
}

/// Snapshot of the world as reported by the console shard
///
/// Always replaced as a whole; never patched field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldStatus {
    pub season: String,
    pub day: u32,
    pub days_left: Option<u32>,
    pub phase: Option<String>,
    pub player_count: usize,
    pub players: Vec<Player>,
    pub captured_at: DateTime<Utc>,
}

/// One entry from the cluster's mod overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModEntry {
    /// Workshop id, e.g. "workshop-378160973"
    pub id: String,
    pub enabled: bool,
}
