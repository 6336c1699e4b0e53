//! StateContainer - serialized functional updates over an immutable snapshot
//!
//! The current state lives behind a `tokio::sync::watch` channel as an
//! `Arc<AppState>`. A snapshot is a clone of that `Arc`, so a reader always sees
//! exactly one published version. `mutate` runs the transformation under the
//! channel's write lock and publishes a brand-new `Arc`, so concurrent
//! mutators are applied one after another and readers never observe a state
//! that is halfway through an update.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, trace};

use super::app_state::AppState;

/// Thread-safe owner of the application state
#[derive(Debug)]
pub struct StateContainer {
    tx: watch::Sender<Arc<AppState>>,
}

impl StateContainer {
    /// Create a container holding `initial`, with the version reset to zero
    pub fn new(initial: AppState) -> Self {
        debug!(shards = initial.shards.len(), "StateContainer::new: called");
        let initial = AppState { version: 0, ..initial };
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx }
    }

    /// Create a container for a fixed set of shard names
    pub fn with_shards<S: AsRef<str>>(shard_names: &[S]) -> Self {
        Self::new(AppState::new(shard_names))
    }

    /// A consistent, immutable view of the current state
    pub fn snapshot(&self) -> Arc<AppState> {
        trace!("StateContainer::snapshot: called");
        self.tx.borrow().clone()
    }

    /// Current version without cloning the state
    pub fn version(&self) -> u64 {
        self.tx.borrow().version
    }

    /// Apply a transformation under exclusive access and return the new version
    ///
    /// The transformation receives an owned copy of the current state and
    /// returns the next state. Whatever version it sets is overwritten: the
    /// container assigns `previous + 1`. It must not call back into this
    /// container and must not perform I/O.
    ///
    /// # Panics
    ///
    /// Propagates a panic raised by the transformation, leaving the previous
    /// state published. Panics if the transformation changed the configured
    /// shard set, which is fixed for the lifetime of the container.
    pub fn mutate<F>(&self, transform: F) -> u64
    where
        F: FnOnce(AppState) -> AppState,
    {
        let mut version = 0;
        self.tx.send_modify(|current| {
            let previous = current.version;
            let next = transform((**current).clone());
            assert!(
                next.same_shard_set(&**current),
                "state mutation changed the configured shard set"
            );
            version = previous + 1;
            *current = Arc::new(AppState { version, ..next });
        });
        trace!(version, "StateContainer::mutate: applied");
        version
    }

    /// Receiver that wakes whenever a new version is published
    pub fn watch(&self) -> watch::Receiver<Arc<AppState>> {
        debug!("StateContainer::watch: new receiver");
        self.tx.subscribe()
    }
}
