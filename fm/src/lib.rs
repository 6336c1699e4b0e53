//! fishmanager - Don't Starve Together shard manager
//!
//! Keeps a live picture of a set of game shards running as systemd user
//! units and lets an operator act on them without the UI ever waiting on a
//! slow collaborator.
//!
//! # Core Concepts
//!
//! - **Snapshots**: All state lives in one immutable [`state::AppState`] that
//!   is swapped atomically; readers never see a half-applied update
//! - **One coordinator**: Every poll, log follow and command runs on the
//!   [`coordinator::Coordinator`]; the UI only sends requests and reads snapshots
//! - **Errors are state**: A failed call is stored next to the last good value
//!   and is cleared by the next success
//!
//! # Modules
//!
//! - [`domain`] - Shards, unit actions, world status and error records
//! - [`state`] - Versioned state container
//! - [`events`] - Event bus and optional event journal
//! - [`backend`] - systemd, journal, console FIFO, cluster files and updater
//! - [`logtail`] - Bounded per-shard log buffers and live follows
//! - [`world`] - Parser for the world status console response
//! - [`coordinator`] - Periodic tasks and user commands
//! - [`tui`] - Terminal dashboard
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod backend;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod events;
pub mod logtail;
pub mod state;
pub mod tui;
pub mod world;

pub use config::Config;
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use state::{AppState, StateContainer};
