//! Event Bus for in-process notifications
//!
//! State mutation and reaction are decoupled through the bus: the coordinator
//! publishes an [`Event`] after it changes the shared state, and any number of
//! handlers react to it on their own delivery threads.
//!
//! # Architecture
//!
//! ```text
//!  Status poll     Chat poll      World poll     Log follow    User commands
//!      │               │              │              │              │
//!      └───────────────┴──────┬───────┴──────────────┴──────────────┘
//!                             ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         EVENT BUS                            │
//! │   publish() enqueues per subscription and returns at once    │
//! └─────────────────────────────────────────────────────────────┘
//!         │ queue + thread      │ queue + thread     │ queue + thread
//!         ▼                     ▼                    ▼
//!   ┌───────────┐         ┌───────────┐        ┌───────────┐
//!   │ handler A │         │ handler B │        │  journal  │
//!   └───────────┘         └───────────┘        └───────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use fishmanager::events::{Event, EventBus, EventKind};
//!
//! let bus = EventBus::new();
//! let handle = bus.subscribe(EventKind::LogLine, |event| {
//!     if let Event::LogLine { shard, line } = event {
//!         println!("[{shard}] {line}");
//!     }
//!     Ok(())
//! });
//!
//! bus.publish(Event::LogLine { shard: "Master".into(), line: "Sim paused".into() });
//! bus.unsubscribe(&handle);
//! ```
//!
//! A handler that returns an error (or panics) is logged and stays
//! subscribed; it never affects the publisher or other handlers.

mod bus;
mod journal;
mod types;

pub use bus::{BusMetrics, EventBus, SubscriptionHandle};
pub use journal::{EventJournal, JournalEntry, read_journal};
pub use types::{Event, EventKind};
