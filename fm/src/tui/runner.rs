//! TUI Runner - main loop that owns the terminal
//!
//! Redraws whenever the state container publishes a new version, a bus event
//! changes what is on screen, or a key is pressed. Never waits on a backend.

use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use super::Tui;
use super::app::App;
use super::events::{EventHandler, TermEvent};
use super::views;
use crate::coordinator::CoordinatorHandle;
use crate::events::{Event, EventBus, SubscriptionHandle};
use crate::state::{AppState, Mode};

/// Input poll interval; ticks only matter for noticing a closed channel
const TICK_RATE: Duration = Duration::from_millis(250);

/// TUI Runner that manages the terminal and event loop
pub struct TuiRunner {
    app: App,
    terminal: Tui,
    event_handler: EventHandler,
    state_rx: watch::Receiver<Arc<AppState>>,
    bus: Arc<EventBus>,
    bus_rx: mpsc::UnboundedReceiver<Event>,
    subscription: SubscriptionHandle,
}

impl TuiRunner {
    pub fn new(terminal: Tui, handle: CoordinatorHandle, bus: Arc<EventBus>) -> Result<Self> {
        debug!("TuiRunner::new: called");
        let (tx, bus_rx) = mpsc::unbounded_channel();
        let subscription = bus.subscribe_all(move |event| {
            tx.send(event.clone())
                .map_err(|_| eyre::eyre!("TUI event channel closed"))
        })?;
        let state_rx = handle.container().watch();

        Ok(Self {
            app: App::new(handle),
            terminal,
            event_handler: EventHandler::new(TICK_RATE),
            state_rx,
            bus,
            bus_rx,
            subscription,
        })
    }

    fn draw(&mut self) -> Result<()> {
        let state = self.state_rx.borrow_and_update().clone();
        let log_lines = match &state.mode {
            Mode::Logs { shard, .. } => self.app.handle().log_lines(shard),
            _ => Vec::new(),
        };
        let view = &self.app.view;
        self.terminal
            .draw(|frame| views::render(frame, &state, view, &log_lines))?;
        Ok(())
    }

    /// Run the TUI main loop
    pub async fn run(&mut self) -> Result<()> {
        debug!("TuiRunner::run: entering main loop");
        let result = self.run_loop().await;
        self.bus.unsubscribe(&self.subscription);
        debug!("TuiRunner::run: exiting");
        result
    }

    async fn run_loop(&mut self) -> Result<()> {
        self.draw()?;
        loop {
            let redraw = tokio::select! {
                event = self.event_handler.next() => match event? {
                    TermEvent::Key(key) => {
                        self.app.handle_key(key);
                        true
                    }
                    TermEvent::Resize(width, height) => {
                        trace!(width, height, "TuiRunner::run: resize");
                        true
                    }
                    TermEvent::Tick => false,
                },
                changed = self.state_rx.changed() => {
                    if changed.is_err() {
                        debug!("TuiRunner::run: state container dropped");
                        break;
                    }
                    true
                }
                Some(event) = self.bus_rx.recv() => self.app.on_event(&event),
            };

            if self.app.should_quit {
                debug!("TuiRunner::run: should_quit is true, breaking");
                break;
            }
            if redraw {
                self.draw()?;
            }
        }
        Ok(())
    }
}
