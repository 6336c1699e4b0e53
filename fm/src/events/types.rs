//! Event types published on the bus
//!
//! Each kind carries its own typed payload. Events are notifications, not
//! commands: a consumer that needs the full picture reads a fresh snapshot
//! from the state container.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Everything the core announces
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// The state changed in a way no more specific event describes
    StateChanged { version: u64 },

    /// A status poll succeeded for one shard
    StatusUpdate { shard: String, running: bool, enabled: bool },

    /// A new line from a followed shard log
    LogLine { shard: String, line: String },

    /// A log follow ended; `error` is set when the log source failed
    LogEnded { shard: String, error: Option<String> },

    /// A new line in the game chat log
    ChatMessage { line: String },

    /// The world status was replaced
    WorldUpdated { version: u64 },

    /// The mod list changed
    ModsRefreshed { count: usize },

    /// A user command finished
    CommandCompleted {
        /// Command name, e.g. "restart", "console", "update"
        command: String,
        /// Shard the command targeted, if any
        target: Option<String>,
        success: bool,
        message: String,
    },

    /// One line of updater output
    UpdaterOutput { line: String },
}

impl Event {
    /// The tag used for subscription routing
    pub fn kind(&self) -> EventKind {
        match self {
            Event::StateChanged { .. } => EventKind::StateChanged,
            Event::StatusUpdate { .. } => EventKind::StatusUpdate,
            Event::LogLine { .. } => EventKind::LogLine,
            Event::LogEnded { .. } => EventKind::LogEnded,
            Event::ChatMessage { .. } => EventKind::ChatMessage,
            Event::WorldUpdated { .. } => EventKind::WorldUpdated,
            Event::ModsRefreshed { .. } => EventKind::ModsRefreshed,
            Event::CommandCompleted { .. } => EventKind::CommandCompleted,
            Event::UpdaterOutput { .. } => EventKind::UpdaterOutput,
        }
    }

    /// The shard this event is about, if any
    pub fn shard(&self) -> Option<&str> {
        match self {
            Event::StatusUpdate { shard, .. } | Event::LogLine { shard, .. } | Event::LogEnded { shard, .. } => {
                Some(shard)
            }
            Event::CommandCompleted { target, .. } => target.as_deref(),
            Event::StateChanged { .. }
            | Event::ChatMessage { .. }
            | Event::WorldUpdated { .. }
            | Event::ModsRefreshed { .. }
            | Event::UpdaterOutput { .. } => None,
        }
    }
}

/// Field-less tag of an [`Event`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    StateChanged,
    StatusUpdate,
    LogLine,
    LogEnded,
    ChatMessage,
    WorldUpdated,
    ModsRefreshed,
    CommandCompleted,
    UpdaterOutput,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        Self::StateChanged,
        Self::StatusUpdate,
        Self::LogLine,
        Self::LogEnded,
        Self::ChatMessage,
        Self::WorldUpdated,
        Self::ModsRefreshed,
        Self::CommandCompleted,
        Self::UpdaterOutput,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StateChanged => "StateChanged",
            Self::StatusUpdate => "StatusUpdate",
            Self::LogLine => "LogLine",
            Self::LogEnded => "LogEnded",
            Self::ChatMessage => "ChatMessage",
            Self::WorldUpdated => "WorldUpdated",
            Self::ModsRefreshed => "ModsRefreshed",
            Self::CommandCompleted => "CommandCompleted",
            Self::UpdaterOutput => "UpdaterOutput",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        let event = Event::LogLine {
            shard: "Master".to_string(),
            line: "Sim paused".to_string(),
        };
        assert_eq!(event.kind(), EventKind::LogLine);
        assert_eq!(event.shard(), Some("Master"));
    }

    #[test]
    fn test_command_completed_shard_is_target() {
        let event = Event::CommandCompleted {
            command: "update".to_string(),
            target: None,
            success: true,
            message: String::new(),
        };
        assert_eq!(event.shard(), None);
    }

    #[test]
    fn test_serialized_form_is_tagged() {
        let event = Event::ChatMessage {
            line: "[Say] (KU_abc) Wilson: hi".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ChatMessage");
        assert_eq!(json["line"], "[Say] (KU_abc) Wilson: hi");
    }
}
