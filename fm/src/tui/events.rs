//! Terminal input
//!
//! crossterm input is read on its own OS thread and forwarded over a tokio
//! channel, so the UI loop can `select!` on input next to state changes.

use std::time::Duration;

use crossterm::event::{self, KeyEvent, KeyEventKind};
use eyre::Result;
use tokio::sync::mpsc;
use tracing::debug;

/// Terminal events
#[derive(Debug)]
pub enum TermEvent {
    /// Key press
    Key(KeyEvent),
    /// Terminal resize
    Resize(u16, u16),
    /// No input within the tick rate
    Tick,
}

/// Input reader for the TUI
pub struct EventHandler {
    rx: mpsc::UnboundedReceiver<TermEvent>,
}

impl EventHandler {
    /// Start the input thread; it exits once the handler is dropped
    pub fn new(tick_rate: Duration) -> Self {
        debug!(?tick_rate, "EventHandler::new: called");
        let (tx, rx) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name("tui-input".to_string())
            .spawn(move || {
                loop {
                    let event = if event::poll(tick_rate).unwrap_or(false) {
                        match event::read() {
                            // Release and repeat events would double every keystroke on some terminals
                            Ok(event::Event::Key(key)) if key.kind == KeyEventKind::Press => TermEvent::Key(key),
                            Ok(event::Event::Resize(w, h)) => TermEvent::Resize(w, h),
                            Ok(_) => continue,
                            Err(e) => {
                                debug!(error = %e, "EventHandler: read failed");
                                continue;
                            }
                        }
                    } else {
                        TermEvent::Tick
                    };

                    if tx.send(event).is_err() {
                        debug!("EventHandler: channel closed, exiting loop");
                        break;
                    }
                }
            })
            .ok();

        Self { rx }
    }

    /// Next terminal event
    pub async fn next(&mut self) -> Result<TermEvent> {
        self.rx.recv().await.ok_or_else(|| eyre::eyre!("Event channel closed"))
    }
}
