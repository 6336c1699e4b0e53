//! UI cursor state
//!
//! Stored in `AppState` so the whole UI can be redrawn from a snapshot, but
//! otherwise opaque to the core: nothing outside the TUI interprets it.

/// Which dashboard panel owns the cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Focus {
    #[default]
    Shards,
    Global,
}

/// Cursor position across the dashboard panels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    pub focus: Focus,
    /// Index into the configured shards
    pub shard: usize,
    /// Index into the per-shard action buttons
    pub action: usize,
    /// Index into the global action buttons
    pub global: usize,
}

/// Current interaction mode
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Mode {
    /// Shards, global actions and chat
    #[default]
    Dashboard,
    /// Live log viewer for one shard
    Logs { shard: String, scroll: usize },
    /// Typing a chat announcement
    ChatInput { buffer: String },
    /// Typing a raw console command
    ConsoleInput { buffer: String },
    /// Keybinding overlay
    Help,
}

impl Mode {
    /// True while a text prompt owns the keyboard
    pub fn is_input(&self) -> bool {
        matches!(self, Self::ChatInput { .. } | Self::ConsoleInput { .. })
    }
}
