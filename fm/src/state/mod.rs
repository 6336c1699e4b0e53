//! Shared state container
//!
//! `StateContainer` is the single source of truth for shard, world, chat and
//! mod data. Readers take immutable `Arc<AppState>` snapshots; writers submit
//! functional updates through `mutate`, which are applied one at a time and
//! each bump the state version exactly once.

mod app_state;
mod container;
mod ui;

pub use app_state::AppState;
pub use container::StateContainer;
pub use ui::{Focus, Mode, Selection};
