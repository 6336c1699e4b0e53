//! CoordinatorHandle - client interface for the UI and the CLI

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::messages::{CoordError, CoordRequest};
use super::task::{TaskBoard, TaskKind, TaskStats};
use crate::domain::UnitAction;
use crate::logtail::LogReader;
use crate::state::{AppState, StateContainer};

/// Handle for talking to the Coordinator
///
/// Cloneable. Command methods never wait: they queue a request and return,
/// and the outcome arrives later as a `CommandCompleted` event.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordRequest>,
    container: Arc<StateContainer>,
    logs: LogReader,
    board: TaskBoard,
}

impl CoordinatorHandle {
    pub(crate) fn new(
        tx: mpsc::Sender<CoordRequest>,
        container: Arc<StateContainer>,
        logs: LogReader,
        board: TaskBoard,
    ) -> Self {
        debug!("CoordinatorHandle::new: called");
        Self {
            tx,
            container,
            logs,
            board,
        }
    }

    fn send(&self, req: CoordRequest) -> Result<(), CoordError> {
        match self.tx.try_send(req) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(req)) => {
                warn!(request = req.name(), "CoordinatorHandle: request channel full");
                Err(CoordError::Busy)
            }
            Err(TrySendError::Closed(_)) => Err(CoordError::Closed),
        }
    }

    /// Force a tick of `kind` now
    pub fn refresh(&self, kind: TaskKind) -> Result<(), CoordError> {
        debug!(%kind, "CoordinatorHandle::refresh: called");
        self.send(CoordRequest::Refresh { kind })
    }

    pub fn control(&self, shard: &str, action: UnitAction) -> Result<(), CoordError> {
        debug!(%shard, ?action, "CoordinatorHandle::control: called");
        self.send(CoordRequest::Control {
            shard: shard.to_string(),
            action,
        })
    }

    /// Apply `action` to every configured shard, one after another
    pub fn control_all(&self, action: UnitAction) -> Result<(), CoordError> {
        debug!(?action, "CoordinatorHandle::control_all: called");
        self.send(CoordRequest::ControlAll { action })
    }

    /// Enable a disabled shard or disable an enabled one
    pub fn toggle_enable(&self, shard: &str) -> Result<(), CoordError> {
        debug!(%shard, "CoordinatorHandle::toggle_enable: called");
        self.send(CoordRequest::ToggleEnable {
            shard: shard.to_string(),
        })
    }

    pub fn follow_logs(&self, shard: &str) -> Result<(), CoordError> {
        debug!(%shard, "CoordinatorHandle::follow_logs: called");
        self.send(CoordRequest::FollowLogs {
            shard: shard.to_string(),
        })
    }

    pub fn stop_follow(&self, shard: &str) -> Result<(), CoordError> {
        debug!(%shard, "CoordinatorHandle::stop_follow: called");
        self.send(CoordRequest::StopFollow {
            shard: shard.to_string(),
        })
    }

    /// Raw console command for the console shard
    pub fn console(&self, command: &str) -> Result<(), CoordError> {
        debug!(%command, "CoordinatorHandle::console: called");
        self.send(CoordRequest::Console {
            command: command.to_string(),
        })
    }

    /// In-game announcement from the console shard
    pub fn announce(&self, message: &str) -> Result<(), CoordError> {
        debug!(%message, "CoordinatorHandle::announce: called");
        self.send(CoordRequest::Announce {
            message: message.to_string(),
        })
    }

    pub fn run_update(&self) -> Result<(), CoordError> {
        debug!("CoordinatorHandle::run_update: called");
        self.send(CoordRequest::RunUpdate)
    }

    /// Shards with a live log follow
    pub async fn following(&self) -> Result<Vec<String>, CoordError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CoordRequest::Following { reply })
            .await
            .map_err(|_| CoordError::Closed)?;
        rx.await.map_err(|_| CoordError::Closed)
    }

    /// Ask the coordinator to stop; waits for room in the channel, not for the stop
    pub async fn shutdown(&self) -> Result<(), CoordError> {
        debug!("CoordinatorHandle::shutdown: called");
        self.tx.send(CoordRequest::Shutdown).await.map_err(|_| CoordError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn snapshot(&self) -> Arc<AppState> {
        self.container.snapshot()
    }

    pub fn container(&self) -> &Arc<StateContainer> {
        &self.container
    }

    /// Buffered log lines for `shard`, oldest first
    pub fn log_lines(&self, shard: &str) -> Vec<String> {
        self.logs.lines(shard)
    }

    pub fn task_stats(&self) -> Vec<(TaskKind, TaskStats)> {
        self.board.all()
    }
}
