//! Coordinator messages
//!
//! Requests for the actor pattern. Every request except `Following` is
//! fire-and-forget: completion is reported through the event bus.

use thiserror::Error;
use tokio::sync::oneshot;

use super::task::TaskKind;
use crate::domain::UnitAction;

/// Errors from handing a request to the coordinator
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoordError {
    #[error("Coordinator is busy, request dropped")]
    Busy,

    #[error("Coordinator has shut down")]
    Closed,
}

/// Requests sent to the Coordinator actor
#[derive(Debug)]
pub enum CoordRequest {
    /// Force a tick of one periodic task
    Refresh { kind: TaskKind },

    // Process control
    Control { shard: String, action: UnitAction },
    ControlAll { action: UnitAction },
    ToggleEnable { shard: String },

    // Log viewing
    FollowLogs { shard: String },
    StopFollow { shard: String },
    Following { reply: oneshot::Sender<Vec<String>> },

    // Console shard
    Console { command: String },
    Announce { message: String },

    RunUpdate,
    Shutdown,
}

impl CoordRequest {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Refresh { .. } => "refresh",
            Self::Control { .. } => "control",
            Self::ControlAll { .. } => "control-all",
            Self::ToggleEnable { .. } => "toggle-enable",
            Self::FollowLogs { .. } => "follow-logs",
            Self::StopFollow { .. } => "stop-follow",
            Self::Following { .. } => "following",
            Self::Console { .. } => "console",
            Self::Announce { .. } => "announce",
            Self::RunUpdate => "update",
            Self::Shutdown => "shutdown",
        }
    }
}
