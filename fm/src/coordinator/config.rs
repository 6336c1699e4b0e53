//! Coordinator timing and policy settings

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::task::TaskKind;

/// Configuration for the background task coordinator
///
/// Periods and timeouts are in milliseconds. A period of zero disables the
/// task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CoordinatorConfig {
    #[serde(default = "default_status_period_ms")]
    pub status_period_ms: u64,

    #[serde(default = "default_chat_period_ms")]
    pub chat_period_ms: u64,

    #[serde(default = "default_world_period_ms")]
    pub world_period_ms: u64,

    #[serde(default = "default_mods_period_ms")]
    pub mods_period_ms: u64,

    /// Limit on every status, chat, world and console call
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Limit on start/stop/restart/enable/disable
    #[serde(default = "default_control_timeout_ms")]
    pub control_timeout_ms: u64,

    /// Limit on a full updater run
    #[serde(default = "default_update_timeout_ms")]
    pub update_timeout_ms: u64,

    /// Chat lines kept in state
    #[serde(default = "default_chat_lines")]
    pub chat_lines: usize,

    /// Log lines kept per shard
    #[serde(default = "default_log_ring_capacity")]
    pub log_ring_capacity: usize,

    /// History lines loaded when a follow starts
    #[serde(default = "default_log_backlog")]
    pub log_backlog: usize,

    /// Following one shard stops every other follow
    #[serde(default = "default_single_live_follow")]
    pub single_live_follow: bool,

    /// The only shard that accepts console commands
    #[serde(default = "default_console_shard")]
    pub console_shard: String,

    /// Capacity of the request channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_status_period_ms() -> u64 {
    2_000
}

fn default_chat_period_ms() -> u64 {
    1_000
}

fn default_world_period_ms() -> u64 {
    15_000
}

fn default_mods_period_ms() -> u64 {
    60_000
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

fn default_control_timeout_ms() -> u64 {
    30_000
}

fn default_update_timeout_ms() -> u64 {
    30 * 60 * 1_000
}

fn default_chat_lines() -> usize {
    50
}

fn default_log_ring_capacity() -> usize {
    500
}

fn default_log_backlog() -> usize {
    100
}

fn default_single_live_follow() -> bool {
    true
}

fn default_console_shard() -> String {
    "Master".to_string()
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            status_period_ms: default_status_period_ms(),
            chat_period_ms: default_chat_period_ms(),
            world_period_ms: default_world_period_ms(),
            mods_period_ms: default_mods_period_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            control_timeout_ms: default_control_timeout_ms(),
            update_timeout_ms: default_update_timeout_ms(),
            chat_lines: default_chat_lines(),
            log_ring_capacity: default_log_ring_capacity(),
            log_backlog: default_log_backlog(),
            single_live_follow: default_single_live_follow(),
            console_shard: default_console_shard(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl CoordinatorConfig {
    /// Tick period for `kind`, or `None` when the task is disabled
    pub fn period(&self, kind: TaskKind) -> Option<Duration> {
        let ms = match kind {
            TaskKind::StatusPoll => self.status_period_ms,
            TaskKind::ChatPoll => self.chat_period_ms,
            TaskKind::WorldPoll => self.world_period_ms,
            TaskKind::ModsRefresh => self.mods_period_ms,
        };
        (ms > 0).then(|| Duration::from_millis(ms))
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn update_timeout(&self) -> Duration {
        Duration::from_millis(self.update_timeout_ms)
    }
}
