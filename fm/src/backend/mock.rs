//! In-memory collaborators for unit tests

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    ClusterFiles, FilesError, GameQuery, LogSource, LogStream, LogUnavailableError, ProcessControl,
    ProcessControlError, QueryError, UpdateError, Updater,
};
use crate::domain::{ModEntry, UnitAction, UnitStatus};

/// What a mock status query does for one shard
#[derive(Debug, Clone)]
pub enum StatusBehavior {
    Report(UnitStatus),
    /// Fail with a transient error
    Fail(String),
    /// Fail with an unknown-unit error
    Unknown,
    /// Never return
    Hang,
}

/// Process control with scripted per-shard behaviour
#[derive(Debug, Default)]
pub struct MockProcess {
    behavior: Mutex<HashMap<String, StatusBehavior>>,
    status_calls: AtomicUsize,
    status_delay: Mutex<Option<Duration>>,
    controls: Mutex<Vec<(String, UnitAction)>>,
    control_error: Mutex<Option<String>>,
    managed: Mutex<Vec<String>>,
    enabled_units: Mutex<Vec<String>>,
}

impl MockProcess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, shard: &str, behavior: StatusBehavior) {
        debug!(%shard, ?behavior, "MockProcess::set: called");
        self.behavior.lock().unwrap().insert(shard.to_string(), behavior);
    }

    pub fn with(self, shard: &str, behavior: StatusBehavior) -> Self {
        self.set(shard, behavior);
        self
    }

    /// Delay every status answer by `delay`
    pub fn with_status_delay(self, delay: Duration) -> Self {
        *self.status_delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn fail_controls(&self, message: &str) {
        *self.control_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn controls(&self) -> Vec<(String, UnitAction)> {
        self.controls.lock().unwrap().clone()
    }

    /// Shards reported as enabled or running on the host
    pub fn with_managed(self, shards: &[&str]) -> Self {
        *self.managed.lock().unwrap() = shards.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn enabled_units(&self) -> Vec<String> {
        self.enabled_units.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessControl for MockProcess {
    async fn status(&self, shard: &str) -> Result<UnitStatus, ProcessControlError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.status_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let behavior = self.behavior.lock().unwrap().get(shard).cloned();
        match behavior.unwrap_or(StatusBehavior::Report(UnitStatus::default())) {
            StatusBehavior::Report(status) => Ok(status),
            StatusBehavior::Fail(stderr) => Err(ProcessControlError::Failed {
                unit: shard.to_string(),
                action: "is-active".to_string(),
                stderr,
            }),
            StatusBehavior::Unknown => Err(ProcessControlError::UnknownUnit(shard.to_string())),
            StatusBehavior::Hang => std::future::pending().await,
        }
    }

    async fn control(&self, shard: &str, action: UnitAction) -> Result<(), ProcessControlError> {
        self.controls.lock().unwrap().push((shard.to_string(), action));
        let error = self.control_error.lock().unwrap().clone();
        match error {
            Some(stderr) => Err(ProcessControlError::Failed {
                unit: shard.to_string(),
                action: action.verb().to_string(),
                stderr,
            }),
            None => Ok(()),
        }
    }

    async fn managed(&self) -> Result<Vec<String>, ProcessControlError> {
        Ok(self.managed.lock().unwrap().clone())
    }

    async fn enable_now(&self, unit: &str) -> Result<(), ProcessControlError> {
        self.enabled_units.lock().unwrap().push(unit.to_string());
        Ok(())
    }
}

/// Log source whose live lines are pushed by the test
#[derive(Debug, Default)]
pub struct MockLogSource {
    backlog: Mutex<HashMap<String, Vec<String>>>,
    live: Mutex<HashMap<String, mpsc::UnboundedSender<String>>>,
    unavailable: Mutex<HashMap<String, String>>,
    tails: AtomicUsize,
}

impl MockLogSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_backlog(&self, shard: &str, lines: &[&str]) {
        self.backlog
            .lock()
            .unwrap()
            .insert(shard.to_string(), lines.iter().map(|l| l.to_string()).collect());
    }

    /// Make `tail` fail for `shard` until cleared
    pub fn set_unavailable(&self, shard: &str, reason: Option<&str>) {
        let mut unavailable = self.unavailable.lock().unwrap();
        match reason {
            Some(reason) => unavailable.insert(shard.to_string(), reason.to_string()),
            None => unavailable.remove(shard),
        };
    }

    /// Send a live line to the current follow of `shard`
    ///
    /// Returns false when no stream for that shard is alive.
    pub fn push(&self, shard: &str, line: &str) -> bool {
        match self.live.lock().unwrap().get(shard) {
            Some(tx) => tx.send(line.to_string()).is_ok(),
            None => false,
        }
    }

    /// End the current follow of `shard` as if the source closed
    pub fn close(&self, shard: &str) {
        self.live.lock().unwrap().remove(shard);
    }

    pub fn tails(&self) -> usize {
        self.tails.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogSource for MockLogSource {
    async fn tail(&self, shard: &str, lines: usize, follow: bool) -> Result<LogStream, LogUnavailableError> {
        self.tails.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.unavailable.lock().unwrap().get(shard) {
            return Err(LogUnavailableError::Failed {
                unit: shard.to_string(),
                stderr: reason.clone(),
            });
        }

        let backlog = self.backlog.lock().unwrap().get(shard).cloned().unwrap_or_default();
        let start = backlog.len().saturating_sub(lines);
        let history = stream::iter(backlog[start..].to_vec().into_iter().map(Ok));
        if !follow {
            return Ok(history.boxed());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.live.lock().unwrap().insert(shard.to_string(), tx);
        let live = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|line| (Ok(line), rx)) });
        Ok(history.chain(live).boxed())
    }
}

/// Game query returning a canned response
#[derive(Debug, Default)]
pub struct MockQuery {
    response: Mutex<Option<String>>,
    failure: Mutex<Option<String>>,
    hang: Mutex<bool>,
    commands: Mutex<Vec<(String, String)>>,
}

impl MockQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, text: &str) {
        *self.response.lock().unwrap() = Some(text.to_string());
        *self.failure.lock().unwrap() = None;
    }

    pub fn fail(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn hang(&self) {
        *self.hang.lock().unwrap() = true;
    }

    pub fn commands(&self) -> Vec<(String, String)> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl GameQuery for MockQuery {
    async fn query(&self, shard: &str, command: &str, _timeout: Duration) -> Result<String, QueryError> {
        self.commands
            .lock()
            .unwrap()
            .push((shard.to_string(), command.to_string()));
        let hang = *self.hang.lock().unwrap();
        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(QueryError::Connection(message));
        }
        Ok(self.response.lock().unwrap().clone().unwrap_or_default())
    }
}

/// Cluster files held in memory
#[derive(Debug, Default)]
pub struct MockFiles {
    chat: Mutex<Option<Vec<String>>>,
    mods: Mutex<Option<Vec<ModEntry>>>,
}

impl MockFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the chat log; `None` makes reads fail
    pub fn set_chat(&self, lines: Option<&[&str]>) {
        *self.chat.lock().unwrap() = lines.map(|l| l.iter().map(|s| s.to_string()).collect());
    }

    pub fn set_mods(&self, mods: Option<Vec<ModEntry>>) {
        *self.mods.lock().unwrap() = mods;
    }
}

#[async_trait]
impl ClusterFiles for MockFiles {
    async fn chat_lines(&self, count: usize) -> Result<Vec<String>, FilesError> {
        match self.chat.lock().unwrap().as_ref() {
            Some(lines) => {
                let start = lines.len().saturating_sub(count);
                Ok(lines[start..].to_vec())
            }
            None => Err(FilesError::NotFound("server_chat_log.txt".into())),
        }
    }

    async fn mods(&self) -> Result<Vec<ModEntry>, FilesError> {
        match self.mods.lock().unwrap().as_ref() {
            Some(mods) => Ok(mods.clone()),
            None => Err(FilesError::NotFound("modoverrides.lua".into())),
        }
    }
}

/// Updater that replays fixed output
#[derive(Debug, Default)]
pub struct MockUpdater {
    pub lines: Vec<String>,
    pub fail: bool,
}

#[async_trait]
impl Updater for MockUpdater {
    async fn run(&self, on_line: &mut (dyn FnMut(String) + Send)) -> Result<(), UpdateError> {
        for line in &self.lines {
            on_line(line.clone());
        }
        if self.fail {
            Err(UpdateError::Exit("exit status: 1".to_string()))
        } else {
            Ok(())
        }
    }
}
