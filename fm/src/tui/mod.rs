//! Terminal dashboard
//!
//! Shards with their status and actions on the left, global actions and the
//! world summary below them, game chat or a live log viewer on the right.

mod app;
mod events;
mod runner;
mod views;

pub use app::{App, GLOBAL_BUTTONS, GlobalButton, Notice, SHARD_BUTTONS, ShardButton, ViewState};
pub use events::{EventHandler, TermEvent};
pub use runner::TuiRunner;

use std::io::{self, Stdout};
use std::sync::Arc;

use crossterm::execute;
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode};
use eyre::Result;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use crate::coordinator::CoordinatorHandle;
use crate::events::EventBus;

/// Terminal type alias
pub type Tui = Terminal<CrosstermBackend<Stdout>>;

/// Initialize the terminal for TUI mode
pub fn init() -> Result<Tui> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

/// Restore the terminal to normal mode
pub fn restore() -> Result<()> {
    disable_raw_mode()?;
    execute!(io::stdout(), LeaveAlternateScreen)?;
    Ok(())
}

/// Run the dashboard until the user quits
///
/// The coordinator behind `handle` must already be running; it is left
/// running for the caller to shut down.
pub async fn run(handle: CoordinatorHandle, bus: Arc<EventBus>) -> Result<()> {
    let terminal = init()?;

    // Restore the terminal even on early return or panic unwind
    struct TerminalGuard;
    impl Drop for TerminalGuard {
        fn drop(&mut self) {
            let _ = restore();
        }
    }
    let _guard = TerminalGuard;

    let mut runner = TuiRunner::new(terminal, handle, bus)?;
    runner.run().await
}
