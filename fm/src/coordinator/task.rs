//! Periodic task runner
//!
//! Each task loop ticks on its own interval and runs its job on a separate
//! tokio task. A tick that arrives while the previous run is still in flight
//! is skipped, so a slow collaborator can never pile up executions.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// The periodic tasks the coordinator owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    StatusPoll,
    ChatPoll,
    WorldPoll,
    ModsRefresh,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [Self::StatusPoll, Self::ChatPoll, Self::WorldPoll, Self::ModsRefresh];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StatusPoll => "status-poll",
            Self::ChatPoll => "chat-poll",
            Self::WorldPoll => "world-poll",
            Self::ModsRefresh => "mods-refresh",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a task has a run in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TaskState {
    #[default]
    Idle,
    Running,
}

/// How a single run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutcome {
    Succeeded,
    Failed { reason: String },
}

impl TaskOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed { reason: reason.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Counters for one periodic task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub state: TaskState,
    /// Runs started
    pub runs: u64,
    /// Ticks dropped because a run was still in flight
    pub skipped: u64,
    /// Runs that ended `Failed`
    pub failures: u64,
    pub last_outcome: Option<TaskOutcome>,
}

/// Shared per-task statistics, readable from any thread
#[derive(Debug, Clone, Default)]
pub struct TaskBoard {
    inner: Arc<Mutex<HashMap<TaskKind, TaskStats>>>,
}

impl TaskBoard {
    fn update(&self, kind: TaskKind, f: impl FnOnce(&mut TaskStats)) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(inner.entry(kind).or_default());
    }

    fn begin(&self, kind: TaskKind) {
        self.update(kind, |s| {
            s.state = TaskState::Running;
            s.runs += 1;
        });
    }

    fn skip(&self, kind: TaskKind) {
        self.update(kind, |s| s.skipped += 1);
    }

    fn finish(&self, kind: TaskKind, outcome: TaskOutcome) {
        self.update(kind, |s| {
            s.state = TaskState::Idle;
            if !outcome.is_success() {
                s.failures += 1;
            }
            s.last_outcome = Some(outcome);
        });
    }

    fn idle(&self, kind: TaskKind) {
        self.update(kind, |s| s.state = TaskState::Idle);
    }

    pub fn stats(&self, kind: TaskKind) -> TaskStats {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.get(&kind).cloned().unwrap_or_default()
    }

    /// Stats for every task, in `TaskKind::ALL` order
    pub fn all(&self) -> Vec<(TaskKind, TaskStats)> {
        TaskKind::ALL.iter().map(|k| (*k, self.stats(*k))).collect()
    }
}

/// The work one periodic task performs per tick
#[async_trait]
pub(crate) trait PollJob: Send + Sync + 'static {
    fn kind(&self) -> TaskKind;

    async fn run(&self) -> TaskOutcome;
}

/// Drives one `PollJob` on a fixed period until shutdown
pub(crate) struct TaskRunner {
    job: Arc<dyn PollJob>,
    period: Duration,
    board: TaskBoard,
    refresh: Arc<Notify>,
    shutdown: watch::Receiver<bool>,
}

impl TaskRunner {
    pub(crate) fn new(
        job: Arc<dyn PollJob>,
        period: Duration,
        board: TaskBoard,
        refresh: Arc<Notify>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            job,
            period,
            board,
            refresh,
            shutdown,
        }
    }

    pub(crate) async fn run(mut self) {
        let kind = self.job.kind();
        info!(%kind, period_ms = self.period.as_millis() as u64, "TaskRunner::run: started");

        // First tick fires immediately
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
                _ = self.refresh.notified() => {
                    debug!(%kind, "TaskRunner::run: refresh requested");
                }
            }

            if in_flight.as_ref().is_some_and(|h| !h.is_finished()) {
                debug!(%kind, "TaskRunner::run: previous run still in flight, skipping tick");
                self.board.skip(kind);
                continue;
            }

            self.board.begin(kind);
            let job = self.job.clone();
            let board = self.board.clone();
            in_flight = Some(tokio::spawn(async move {
                let outcome = job.run().await;
                if let TaskOutcome::Failed { reason } = &outcome {
                    debug!(%kind, %reason, "TaskRunner: run failed");
                }
                board.finish(kind, outcome);
            }));
        }

        // Abandon whatever is in flight; child processes die with their futures
        if let Some(handle) = in_flight {
            handle.abort();
            if let Err(e) = handle.await {
                if e.is_panic() {
                    warn!(%kind, "TaskRunner::run: job panicked");
                }
            }
        }
        self.board.idle(kind);
        info!(%kind, "TaskRunner::run: stopped");
    }
}
