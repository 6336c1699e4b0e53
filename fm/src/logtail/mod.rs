//! Log Tail Aggregator
//!
//! Keeps the most recent lines of every shard log in a bounded ring and runs
//! live follow tasks that feed the rings and publish `LogLine` events.

mod aggregator;
mod ring;

pub use aggregator::{LogReader, LogTailAggregator, LogTailConfig};
pub use ring::LogRing;
