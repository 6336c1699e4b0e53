//! TUI application logic
//!
//! Turns key presses into cursor updates (written through the state
//! container) and coordinator requests. Nothing here waits on a collaborator.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tracing::debug;

use crate::coordinator::{CoordError, CoordinatorHandle, TaskKind};
use crate::domain::UnitAction;
use crate::events::Event;
use crate::state::{AppState, Focus, Mode, Selection};

/// Updater lines kept for display
const UPDATE_LINES: usize = 500;

/// Lines moved by PageUp/PageDown in the log viewer
const PAGE: usize = 10;

/// Buttons on every shard row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardButton {
    Control(UnitAction),
    Logs,
}

impl ShardButton {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Control(UnitAction::Start) => "Start",
            Self::Control(UnitAction::Stop) => "Stop",
            Self::Control(UnitAction::Restart) => "Restart",
            Self::Control(UnitAction::Enable) => "Enable",
            Self::Control(UnitAction::Disable) => "Disable",
            Self::Logs => "Logs",
        }
    }
}

pub const SHARD_BUTTONS: [ShardButton; 4] = [
    ShardButton::Control(UnitAction::Start),
    ShardButton::Control(UnitAction::Stop),
    ShardButton::Control(UnitAction::Restart),
    ShardButton::Logs,
];

/// Buttons in the global panel, laid out two per row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalButton {
    Control(UnitAction),
    Update,
}

impl GlobalButton {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Control(action) => ShardButton::Control(*action).label(),
            Self::Update => "Update",
        }
    }
}

pub const GLOBAL_BUTTONS: [GlobalButton; 6] = [
    GlobalButton::Control(UnitAction::Start),
    GlobalButton::Control(UnitAction::Stop),
    GlobalButton::Control(UnitAction::Enable),
    GlobalButton::Control(UnitAction::Disable),
    GlobalButton::Control(UnitAction::Restart),
    GlobalButton::Update,
];

const GLOBAL_COLUMNS: usize = 2;

/// Cursor movement on the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nav {
    Up,
    Down,
    Left,
    Right,
}

/// Move the dashboard cursor
///
/// Moving down past the last shard enters the global panel; moving up from
/// its first row returns to the shards.
pub fn navigate(sel: Selection, shard_count: usize, nav: Nav) -> Selection {
    let mut next = sel;
    match (sel.focus, nav) {
        (Focus::Shards, Nav::Down) => {
            if shard_count == 0 || sel.shard + 1 >= shard_count {
                next.focus = Focus::Global;
                next.global = 0;
            } else {
                next.shard += 1;
            }
        }
        (Focus::Shards, Nav::Up) => next.shard = sel.shard.saturating_sub(1),
        (Focus::Shards, Nav::Right) => next.action = (sel.action + 1) % SHARD_BUTTONS.len(),
        (Focus::Shards, Nav::Left) => next.action = (sel.action + SHARD_BUTTONS.len() - 1) % SHARD_BUTTONS.len(),
        (Focus::Global, Nav::Down) => {
            if sel.global + GLOBAL_COLUMNS < GLOBAL_BUTTONS.len() {
                next.global += GLOBAL_COLUMNS;
            }
        }
        (Focus::Global, Nav::Up) => {
            if sel.global < GLOBAL_COLUMNS {
                next.focus = Focus::Shards;
            } else {
                next.global -= GLOBAL_COLUMNS;
            }
        }
        (Focus::Global, Nav::Right) => next.global = (sel.global + 1) % GLOBAL_BUTTONS.len(),
        (Focus::Global, Nav::Left) => next.global = (sel.global + GLOBAL_BUTTONS.len() - 1) % GLOBAL_BUTTONS.len(),
    }
    next
}

/// Result line shown in the footer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    pub success: bool,
}

impl Notice {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            success: true,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            success: false,
        }
    }
}

/// Display-only state that is not part of the shared snapshot
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    pub notice: Option<Notice>,
    /// Output of the current or last update
    pub update_output: Vec<String>,
    /// Right pane shows update output instead of chat
    pub show_update: bool,
    pub updating: bool,
}

/// Main TUI application
pub struct App {
    handle: CoordinatorHandle,
    pub view: ViewState,
    pub should_quit: bool,
}

impl App {
    pub fn new(handle: CoordinatorHandle) -> Self {
        debug!("App::new: called");
        Self {
            handle,
            view: ViewState::default(),
            should_quit: false,
        }
    }

    pub fn handle(&self) -> &CoordinatorHandle {
        &self.handle
    }

    fn set_mode(&self, mode: Mode) {
        self.handle.container().mutate(|mut s| {
            s.mode = mode;
            s
        });
    }

    fn set_selection(&self, selection: Selection) {
        self.handle.container().mutate(|mut s| {
            s.selection = selection;
            s
        });
    }

    /// Report a request the coordinator would not take
    fn sent(&mut self, what: &str, result: Result<(), CoordError>) {
        if let Err(e) = result {
            self.view.notice = Some(Notice::error(format!("{}: {}", what, e)));
        }
    }

    /// Handle a key press
    pub fn handle_key(&mut self, key: KeyEvent) {
        debug!(?key, "App::handle_key: called");
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }

        let snap = self.handle.snapshot();
        if snap.mode.is_input() {
            return self.input_key(key, &snap.mode);
        }
        match &snap.mode {
            Mode::Logs { shard, scroll } => self.logs_key(key, shard, *scroll),
            Mode::Help => self.set_mode(Mode::Dashboard),
            _ => self.dashboard_key(key, &snap),
        }
    }

    fn dashboard_key(&mut self, key: KeyEvent, snap: &AppState) {
        let nav = match key.code {
            KeyCode::Up | KeyCode::Char('k') => Some(Nav::Up),
            KeyCode::Down | KeyCode::Char('j') => Some(Nav::Down),
            KeyCode::Left | KeyCode::Char('h') => Some(Nav::Left),
            KeyCode::Right | KeyCode::Char('l') => Some(Nav::Right),
            _ => None,
        };
        if let Some(nav) = nav {
            self.set_selection(navigate(snap.selection, snap.shards.len(), nav));
            return;
        }

        match key.code {
            KeyCode::Enter => self.activate(snap),
            KeyCode::Char('e') => self.toggle_enable(snap),
            KeyCode::Char('c') => self.set_mode(Mode::ChatInput { buffer: String::new() }),
            KeyCode::Char(':') => self.set_mode(Mode::ConsoleInput { buffer: String::new() }),
            KeyCode::Char('r') => {
                for kind in [TaskKind::StatusPoll, TaskKind::WorldPoll, TaskKind::ChatPoll] {
                    let result = self.handle.refresh(kind);
                    self.sent("refresh", result);
                }
            }
            KeyCode::Char('?') => self.set_mode(Mode::Help),
            KeyCode::Char('q') | KeyCode::Esc => {
                if self.view.show_update {
                    self.view.show_update = false;
                } else {
                    self.should_quit = true;
                }
            }
            _ => {}
        }
    }

    fn activate(&mut self, snap: &AppState) {
        let sel = snap.selection;
        match sel.focus {
            Focus::Shards => {
                let Some(shard) = snap.selected_shard() else {
                    return;
                };
                match SHARD_BUTTONS[sel.action % SHARD_BUTTONS.len()] {
                    ShardButton::Logs => {
                        let result = self.handle.follow_logs(&shard.name);
                        self.sent("logs", result);
                        self.set_mode(Mode::Logs {
                            shard: shard.name.clone(),
                            scroll: 0,
                        });
                    }
                    ShardButton::Control(action) => {
                        if self.busy(snap) {
                            return;
                        }
                        let result = self.handle.control(&shard.name, action);
                        self.sent(action.verb(), result);
                    }
                }
            }
            Focus::Global => match GLOBAL_BUTTONS[sel.global % GLOBAL_BUTTONS.len()] {
                GlobalButton::Control(action) => {
                    if self.busy(snap) {
                        return;
                    }
                    let result = self.handle.control_all(action);
                    self.sent(action.verb(), result);
                }
                GlobalButton::Update => {
                    if self.view.updating {
                        self.view.notice = Some(Notice::error("update already running"));
                        return;
                    }
                    let result = self.handle.run_update();
                    if result.is_ok() {
                        self.view.update_output.clear();
                        self.view.show_update = true;
                        self.view.updating = true;
                    }
                    self.sent("update", result);
                }
            },
        }
    }

    /// One control action at a time, like the busy title suggests
    fn busy(&mut self, snap: &AppState) -> bool {
        if snap.pending_actions > 0 {
            self.view.notice = Some(Notice::error("waiting for the previous action"));
            return true;
        }
        false
    }

    fn toggle_enable(&mut self, snap: &AppState) {
        if snap.selection.focus != Focus::Shards || self.busy(snap) {
            return;
        }
        if let Some(shard) = snap.selected_shard() {
            let result = self.handle.toggle_enable(&shard.name);
            self.sent("toggle", result);
        }
    }

    fn logs_key(&mut self, key: KeyEvent, shard: &str, scroll: usize) {
        let max_scroll = self.handle.log_lines(shard).len().saturating_sub(1);
        let scroll = match key.code {
            KeyCode::Up | KeyCode::Char('k') => scroll + 1,
            KeyCode::Down | KeyCode::Char('j') => scroll.saturating_sub(1),
            KeyCode::PageUp => scroll + PAGE,
            KeyCode::PageDown => scroll.saturating_sub(PAGE),
            KeyCode::Home | KeyCode::Char('g') => max_scroll,
            KeyCode::End | KeyCode::Char('G') => 0,
            KeyCode::Char('f') => {
                let result = self.handle.follow_logs(shard);
                self.sent("logs", result);
                return;
            }
            KeyCode::Char('q') | KeyCode::Esc | KeyCode::Left => {
                // Stay on the log view until the follow is really released
                let result = self.handle.stop_follow(shard);
                if result.is_ok() {
                    self.set_mode(Mode::Dashboard);
                }
                self.sent("logs", result);
                return;
            }
            _ => return,
        };
        self.set_mode(Mode::Logs {
            shard: shard.to_string(),
            scroll: scroll.min(max_scroll),
        });
    }

    fn input_key(&mut self, key: KeyEvent, mode: &Mode) {
        let (Mode::ChatInput { buffer } | Mode::ConsoleInput { buffer }) = mode else {
            return;
        };
        let mut buffer = buffer.clone();
        match key.code {
            KeyCode::Esc => return self.set_mode(Mode::Dashboard),
            KeyCode::Enter => {
                let text = buffer.trim();
                if !text.is_empty() {
                    let result = match mode {
                        Mode::ChatInput { .. } => self.handle.announce(text),
                        _ => self.handle.console(text),
                    };
                    self.sent("console", result);
                }
                return self.set_mode(Mode::Dashboard);
            }
            KeyCode::Backspace => {
                buffer.pop();
            }
            KeyCode::Char(c) => buffer.push(c),
            _ => return,
        }
        let next = match mode {
            Mode::ChatInput { .. } => Mode::ChatInput { buffer },
            _ => Mode::ConsoleInput { buffer },
        };
        self.set_mode(next);
    }

    /// React to a bus event; returns true when the screen needs a redraw
    pub fn on_event(&mut self, event: &Event) -> bool {
        match event {
            Event::CommandCompleted {
                command,
                target,
                success,
                message,
            } => {
                if command == "update" {
                    self.view.updating = false;
                }
                let subject = match target {
                    Some(target) => format!("{} {}", command, target),
                    None => command.clone(),
                };
                let detail = message.lines().last().unwrap_or("").trim();
                let text = if detail.is_empty() {
                    format!("{}: done", subject)
                } else {
                    format!("{}: {}", subject, detail)
                };
                self.view.notice = Some(if *success { Notice::ok(text) } else { Notice::error(text) });
                true
            }
            Event::UpdaterOutput { line } => {
                self.view.update_output.push(line.clone());
                if self.view.update_output.len() > UPDATE_LINES {
                    let excess = self.view.update_output.len() - UPDATE_LINES;
                    self.view.update_output.drain(..excess);
                }
                self.view.show_update
            }
            Event::LogEnded {
                shard,
                error: Some(error),
            } => {
                self.view.notice = Some(Notice::error(format!("logs {}: {}", shard, error)));
                true
            }
            Event::LogLine { .. } => matches!(self.handle.snapshot().mode, Mode::Logs { .. }),
            _ => false,
        }
    }
}
