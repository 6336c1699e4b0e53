//! TUI views and rendering
//!
//! Everything is drawn from an `AppState` snapshot plus the TUI's own
//! `ViewState`. Rendering never modifies either.

use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use tracing::trace;

use super::app::{GLOBAL_BUTTONS, SHARD_BUTTONS, ViewState};
use crate::domain::{ErrorRecord, ShardState, WorldStatus};
use crate::state::{AppState, Focus, Mode};

/// Catppuccin Mocha
mod colors {
    use ratatui::style::Color;

    pub const TITLE: Color = Color::Rgb(137, 180, 250); // Blue
    pub const RUNNING: Color = Color::Rgb(166, 227, 161); // Green
    pub const STOPPED: Color = Color::Rgb(243, 139, 168); // Red
    pub const ERROR: Color = Color::Rgb(243, 139, 168); // Red
    pub const WAITING: Color = Color::Rgb(249, 226, 175); // Yellow
    pub const ENABLED: Color = Color::Rgb(148, 226, 213); // Teal
    pub const KEYBIND: Color = Color::Rgb(137, 220, 235); // Sky
    pub const SELECTED_FG: Color = Color::Rgb(30, 30, 46); // Base
    pub const SELECTED_BG: Color = Color::Rgb(203, 166, 247); // Mauve
    pub const BORDER: Color = Color::Rgb(88, 91, 112); // Surface 2
    pub const TEXT: Color = Color::Rgb(205, 214, 244);
    pub const DIM: Color = Color::Rgb(127, 132, 156); // Overlay 1
}

pub const MIN_WIDTH: u16 = 40;
pub const MIN_HEIGHT: u16 = 12;

/// Render the whole screen
///
/// `log_lines` is the buffered output of the shard shown in the log viewer,
/// empty outside of it.
pub fn render(frame: &mut Frame, state: &AppState, view: &ViewState, log_lines: &[String]) {
    trace!(version = state.version, "render: called");
    let area = frame.area();
    if area.width < MIN_WIDTH || area.height < MIN_HEIGHT {
        let msg = Paragraph::new("Terminal too small")
            .alignment(Alignment::Center)
            .style(Style::default().fg(colors::ERROR));
        frame.render_widget(msg, area);
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Title
            Constraint::Min(0),    // Panels
            Constraint::Length(1), // Footer
        ])
        .split(area);

    render_title(state, frame, chunks[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(chunks[1]);

    let shard_rows = state.shards.len().max(1) as u16 + 2;
    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(shard_rows),
            Constraint::Length(5), // Three rows of global buttons
            Constraint::Min(4),
        ])
        .split(body[0]);

    render_shards(state, frame, left[0]);
    render_global(state, frame, left[1]);
    render_world(state, frame, left[2]);

    match &state.mode {
        Mode::Logs { shard, scroll } => {
            render_logs(state.shard(shard), shard, *scroll, log_lines, frame, body[1])
        }
        _ if view.show_update => render_update(view, frame, body[1]),
        _ => render_chat(state, frame, body[1]),
    }

    render_footer(state, view, frame, chunks[2]);

    if state.mode == Mode::Help {
        render_help_overlay(frame, area);
    }
}

fn panel<'a>(title: impl Into<String>, focused: bool) -> Block<'a> {
    let border = if focused { colors::TITLE } else { colors::BORDER };
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
        .title(Span::styled(
            format!(" {} ", title.into()),
            Style::default().fg(colors::TITLE).add_modifier(Modifier::BOLD),
        ))
}

fn render_title(state: &AppState, frame: &mut Frame, area: Rect) {
    let mut spans = vec![Span::styled(
        " DST SYSTEMD MANAGER",
        Style::default().fg(colors::TITLE).add_modifier(Modifier::BOLD),
    )];
    if state.pending_actions > 0 {
        spans.push(Span::styled(
            " [WAITING...]",
            Style::default().fg(colors::WAITING).add_modifier(Modifier::BOLD),
        ));
    }
    let errors = state.error_count();
    if errors > 0 {
        spans.push(Span::styled(
            format!("  {} error{}", errors, if errors == 1 { "" } else { "s" }),
            Style::default().fg(colors::ERROR),
        ));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn button<'a>(label: &'a str, selected: bool) -> Span<'a> {
    if selected {
        Span::styled(
            format!("[{}]", label),
            Style::default()
                .fg(colors::SELECTED_FG)
                .bg(colors::SELECTED_BG)
                .add_modifier(Modifier::BOLD),
        )
    } else {
        Span::styled(format!(" {} ", label), Style::default().fg(colors::TEXT))
    }
}

fn shard_line<'a>(shard: &'a ShardState, selected: bool, action: usize) -> Line<'a> {
    let (icon, color) = if shard.running {
        ("●", colors::RUNNING)
    } else {
        ("○", colors::STOPPED)
    };
    let name_style = if selected {
        Style::default().fg(colors::TITLE).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(colors::TEXT)
    };

    let mut spans = vec![
        Span::raw(if selected { "> " } else { "  " }),
        Span::styled(icon, Style::default().fg(color)),
        Span::raw(" "),
        Span::styled(format!("{:<10}", shard.name), name_style),
        Span::styled(
            if shard.enabled { "auto " } else { "     " },
            Style::default().fg(colors::ENABLED),
        ),
    ];
    if shard.last_error.is_some() {
        spans.push(Span::styled(
            "! ",
            Style::default().fg(colors::ERROR).add_modifier(Modifier::BOLD),
        ));
    } else {
        spans.push(Span::raw("  "));
    }
    for (i, b) in SHARD_BUTTONS.iter().enumerate() {
        spans.push(button(b.label(), selected && i == action));
    }
    Line::from(spans)
}

fn render_shards(state: &AppState, frame: &mut Frame, area: Rect) {
    trace!("render_shards: called");
    let focused = state.selection.focus == Focus::Shards && state.mode == Mode::Dashboard;
    let lines: Vec<Line> = if state.shards.is_empty() {
        vec![Line::from(Span::styled("  No shards configured", Style::default().fg(colors::DIM)))]
    } else {
        state
            .shards
            .iter()
            .enumerate()
            .map(|(i, shard)| shard_line(shard, focused && i == state.selection.shard, state.selection.action))
            .collect()
    };
    frame.render_widget(Paragraph::new(lines).block(panel("SHARDS", focused)), area);
}

fn render_global(state: &AppState, frame: &mut Frame, area: Rect) {
    let focused = state.selection.focus == Focus::Global && state.mode == Mode::Dashboard;
    let lines: Vec<Line> = GLOBAL_BUTTONS
        .chunks(2)
        .enumerate()
        .map(|(row, pair)| {
            let mut spans = vec![Span::raw("  ")];
            for (col, b) in pair.iter().enumerate() {
                let index = row * 2 + col;
                spans.push(button(b.label(), focused && index == state.selection.global));
                spans.push(Span::raw("   "));
            }
            Line::from(spans)
        })
        .collect();
    frame.render_widget(Paragraph::new(lines).block(panel("GLOBAL", focused)), area);
}

fn error_line(error: &ErrorRecord) -> Line<'_> {
    Line::from(Span::styled(format!(" {}", error), Style::default().fg(colors::ERROR)))
}

fn world_lines(world: &WorldStatus) -> Vec<Line<'_>> {
    let mut season = format!(" {} · Day {}", capitalize(&world.season), world.day);
    if let Some(left) = world.days_left {
        season.push_str(&format!(" ({} days left)", left));
    }
    if let Some(phase) = &world.phase {
        season.push_str(&format!(" · {}", capitalize(phase)));
    }

    let mut lines = vec![
        Line::from(Span::styled(season, Style::default().fg(colors::TEXT))),
        Line::from(Span::styled(
            format!(" Players ({})", world.player_count),
            Style::default().fg(colors::TITLE),
        )),
    ];
    for player in &world.players {
        lines.push(Line::from(vec![
            Span::raw("   "),
            Span::styled(player.name.as_str(), Style::default().fg(colors::TEXT)),
            Span::styled(format!(" ({})", player.character), Style::default().fg(colors::DIM)),
        ]));
    }
    lines
}

fn render_world(state: &AppState, frame: &mut Frame, area: Rect) {
    trace!("render_world: called");
    let mut lines = match &state.world {
        Some(world) => world_lines(world),
        None => vec![Line::from(Span::styled(
            " No world status yet",
            Style::default().fg(colors::DIM),
        ))],
    };
    if let Some(error) = &state.world_error {
        lines.push(error_line(error));
    }

    let enabled = state.mods.iter().filter(|m| m.enabled).count();
    lines.push(Line::from(Span::styled(
        format!(" Mods: {} enabled of {}", enabled, state.mods.len()),
        Style::default().fg(colors::DIM),
    )));
    if let Some(error) = &state.mods_error {
        lines.push(error_line(error));
    }

    frame.render_widget(
        Paragraph::new(lines)
            .block(panel("WORLD", false))
            .wrap(Wrap { trim: false }),
        area,
    );
}

/// Last lines that fit in `area` inside a border, below `reserved` lines,
/// ending `scroll` lines up from the bottom
fn visible<'a>(lines: &'a [String], area: Rect, reserved: usize, scroll: usize) -> &'a [String] {
    let height = (area.height.saturating_sub(2) as usize).saturating_sub(reserved);
    let end = lines.len().saturating_sub(scroll);
    let start = end.saturating_sub(height);
    &lines[start..end]
}

fn plain_lines(lines: &[String]) -> Vec<Line<'_>> {
    lines
        .iter()
        .map(|l| Line::from(Span::styled(l.as_str(), Style::default().fg(colors::TEXT))))
        .collect()
}

fn render_chat(state: &AppState, frame: &mut Frame, area: Rect) {
    trace!("render_chat: called");
    let mut lines = Vec::new();
    if let Some(error) = &state.chat_error {
        lines.push(error_line(error));
    }
    if state.chat.is_empty() {
        lines.push(Line::from(Span::styled(
            "Game chat will appear here",
            Style::default().fg(colors::DIM),
        )));
    } else {
        let reserved = lines.len();
        lines.extend(plain_lines(visible(&state.chat, area, reserved, 0)));
    }
    frame.render_widget(Paragraph::new(lines).block(panel("LOGS", false)), area);
}

fn render_logs(
    shard: Option<&ShardState>,
    name: &str,
    scroll: usize,
    log_lines: &[String],
    frame: &mut Frame,
    area: Rect,
) {
    trace!(%name, scroll, "render_logs: called");
    let mut lines = Vec::new();
    if let Some(error) = shard.and_then(|s| s.log_error.as_ref()) {
        lines.push(error_line(error));
    }
    if log_lines.is_empty() && lines.is_empty() {
        lines.push(Line::from(Span::styled("Waiting for output...", Style::default().fg(colors::DIM))));
    }
    let reserved = lines.len();
    lines.extend(plain_lines(visible(log_lines, area, reserved, scroll)));

    let title = if scroll > 0 {
        format!("LOGS: {} (+{})", name, scroll)
    } else {
        format!("LOGS: {}", name)
    };
    frame.render_widget(Paragraph::new(lines).block(panel(title, true)), area);
}

fn render_update(view: &ViewState, frame: &mut Frame, area: Rect) {
    let title = if view.updating { "UPDATE (running)" } else { "UPDATE" };
    let lines = plain_lines(visible(&view.update_output, area, 0, 0));
    frame.render_widget(Paragraph::new(lines).block(panel(title, true)), area);
}

fn render_footer(state: &AppState, view: &ViewState, frame: &mut Frame, area: Rect) {
    let prompt = match &state.mode {
        Mode::ChatInput { buffer } => Some(("Chat: ", buffer)),
        Mode::ConsoleInput { buffer } => Some(("Console: ", buffer)),
        _ => None,
    };
    let content = if let Some((label, buffer)) = prompt {
        Line::from(vec![
            Span::styled(label, Style::default().fg(colors::KEYBIND).add_modifier(Modifier::BOLD)),
            Span::raw(buffer.as_str()),
            Span::styled("_", Style::default().add_modifier(Modifier::SLOW_BLINK)),
            Span::styled("  (Enter to send, Esc to cancel)", Style::default().fg(colors::DIM)),
        ])
    } else if let Some(notice) = &view.notice {
        let color = if notice.success { colors::RUNNING } else { colors::ERROR };
        Line::from(Span::styled(format!(" {}", notice.text), Style::default().fg(color)))
    } else {
        let keys = match &state.mode {
            Mode::Logs { .. } => " ↑↓:SCROLL | F:FOLLOW | Q:BACK ",
            _ => " ARROWS:NAV | ENTER:RUN | E:ENABLE | Q:BACK ",
        };
        let mut spans = vec![Span::styled(keys, Style::default().fg(colors::DIM))];
        if state.mode == Mode::Dashboard {
            spans.push(Span::styled(" Press C to chat ", Style::default().fg(colors::KEYBIND)));
        }
        Line::from(spans)
    };
    frame.render_widget(Paragraph::new(content), area);
}

fn render_help_overlay(frame: &mut Frame, area: Rect) {
    trace!("render_help_overlay: called");
    let popup_area = centered_rect(60, 70, area);
    frame.render_widget(Clear, popup_area);

    let help_text = vec![
        Line::from(vec![Span::styled(
            "Keyboard Shortcuts",
            Style::default()
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
                .fg(colors::TITLE),
        )]),
        Line::from(""),
        key_line("↑↓ / jk", "Move between shards and global actions"),
        key_line("←→ / hl", "Select an action"),
        key_line("Enter", "Run the selected action"),
        key_line("e", "Toggle autostart for the shard"),
        key_line("c", "Announce a chat message"),
        key_line(":", "Send a console command"),
        key_line("r", "Refresh status now"),
        key_line("?", "This help"),
        key_line("q / Esc", "Back or quit"),
        Line::from(""),
        Line::from(vec![Span::styled("Logs", Style::default().add_modifier(Modifier::BOLD))]),
        key_line("↑↓ PgUp PgDn", "Scroll"),
        key_line("g / G", "Oldest / newest"),
        key_line("f", "Follow again after an error"),
        Line::from(""),
        Line::from(Span::styled("Press any key to close", Style::default().fg(colors::DIM))),
    ];

    let help = Paragraph::new(help_text)
        .block(panel("Help", true))
        .wrap(Wrap { trim: false });
    frame.render_widget(help, popup_area);
}

fn key_line<'a>(key: &'a str, desc: &'a str) -> Line<'a> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(format!("{:<14}", key), Style::default().fg(colors::KEYBIND)),
        Span::raw(desc),
    ])
}

/// Helper to create a centered rect
fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
