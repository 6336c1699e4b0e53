//! Domain types for fishmanager
//!
//! Plain value types shared by the state container, the coordinator and the
//! collaborators: shard status, world status, mods, error records and the
//! systemd unit vocabulary. None of these types perform I/O.

mod error;
mod shard;
mod unit;
mod world;

pub use error::{ErrorKind, ErrorRecord};
pub use shard::ShardState;
pub use unit::{UnitAction, UnitStatus};
pub use world::{ModEntry, Player, WorldStatus};
