//! Background Task Coordinator
//!
//! The coordinator is an actor that owns every piece of background work:
//! - **Periodic tasks:** status, chat, world and mod polls on their own timers
//! - **Log follows:** through the log tail aggregator, one live shard by default
//! - **User commands:** control actions, console commands and updates
//!
//! The UI talks to it through a [`CoordinatorHandle`] whose methods never
//! block; results come back as events and as new state versions.

mod config;
mod core;
mod handle;
mod jobs;
mod messages;
mod task;

pub use config::CoordinatorConfig;
pub use self::core::Coordinator;
pub use handle::CoordinatorHandle;
pub use messages::{CoordError, CoordRequest};
pub use task::{TaskBoard, TaskKind, TaskOutcome, TaskState, TaskStats};
