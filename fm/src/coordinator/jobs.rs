//! The four periodic jobs
//!
//! Every job follows the same shape: call a collaborator under a timeout with
//! no state access held, fold the result into the container with one
//! `mutate`, then publish.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use super::config::CoordinatorConfig;
use super::task::{PollJob, TaskKind, TaskOutcome};
use crate::backend::{Backends, QueryError};
use crate::domain::ErrorRecord;
use crate::events::{Event, EventBus};
use crate::state::StateContainer;
use crate::world::{STATUS_COMMAND, parse_world_status};

/// Shared handles every job and user command works with
pub(crate) struct JobContext {
    pub(crate) container: Arc<StateContainer>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) backends: Backends,
    pub(crate) config: CoordinatorConfig,
}

impl JobContext {
    /// Console calls poll for their response until the call timeout, so the
    /// outer limit leaves them a little room to finish on their own
    pub(crate) fn console_deadline(&self) -> Duration {
        self.config.call_timeout() + Duration::from_secs(1)
    }
}

/// Same error as before, ignoring when it happened
fn same_error(current: &Option<ErrorRecord>, next: &ErrorRecord) -> bool {
    current.as_ref().is_some_and(|e| e.kind == next.kind && e.message == next.message)
}

/// Per-shard `status()` on every tick
pub(crate) struct StatusPoll {
    ctx: Arc<JobContext>,
    /// Shards whose permanent error has already been logged
    reported: Mutex<HashSet<String>>,
}

impl StatusPoll {
    pub(crate) fn new(ctx: Arc<JobContext>) -> Self {
        Self {
            ctx,
            reported: Mutex::new(HashSet::new()),
        }
    }

    async fn poll_shard(&self, shard: &str) -> bool {
        let call_timeout = self.ctx.config.call_timeout();
        let result = timeout(call_timeout, self.ctx.backends.process.status(shard)).await;

        let error = match result {
            Ok(Ok(status)) => {
                let checked_at = Utc::now();
                self.ctx
                    .container
                    .mutate(|s| s.with_shard(shard, |sh| sh.record_success(status, checked_at)));
                self.reported
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(shard);
                self.ctx.bus.publish(Event::StatusUpdate {
                    shard: shard.to_string(),
                    running: status.running,
                    enabled: status.enabled,
                });
                return true;
            }
            Ok(Err(e)) => e.to_record(),
            Err(_) => ErrorRecord::transient(format!("status query timed out after {:?}", call_timeout)),
        };

        if error.is_permanent() {
            let first = self
                .reported
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(shard.to_string());
            if first {
                error!(%shard, %error, "StatusPoll: permanent status failure");
            } else {
                debug!(%shard, %error, "StatusPoll: permanent status failure persists");
            }
        } else {
            warn!(%shard, %error, "StatusPoll: status query failed");
        }

        self.ctx
            .container
            .mutate(|s| s.with_shard(shard, |sh| sh.record_failure(error)));
        false
    }
}

#[async_trait]
impl PollJob for StatusPoll {
    fn kind(&self) -> TaskKind {
        TaskKind::StatusPoll
    }

    async fn run(&self) -> TaskOutcome {
        let shards: Vec<String> = self.ctx.container.snapshot().shard_names().map(String::from).collect();
        debug!(count = shards.len(), "StatusPoll::run: called");
        if shards.is_empty() {
            return TaskOutcome::Succeeded;
        }

        let results = join_all(shards.iter().map(|s| self.poll_shard(s))).await;
        let succeeded = results.iter().filter(|ok| **ok).count();
        if succeeded == 0 {
            TaskOutcome::failed(format!("all {} shards failed", shards.len()))
        } else {
            TaskOutcome::Succeeded
        }
    }
}

/// Lines of `current` that were not already at the end of `previous`
///
/// The two windows overlap where a suffix of `previous` equals a prefix of
/// `current`; the longest such overlap is taken.
pub(crate) fn new_chat_lines<'a>(previous: &[String], current: &'a [String]) -> &'a [String] {
    let max = previous.len().min(current.len());
    let overlap = (0..=max)
        .rev()
        .find(|&k| previous[previous.len() - k..] == current[..k])
        .unwrap_or(0);
    &current[overlap..]
}

/// Tail of the cluster chat log
pub(crate) struct ChatPoll {
    ctx: Arc<JobContext>,
    /// Window seen on the previous successful read; `None` until seeded
    previous: Mutex<Option<Vec<String>>>,
}

impl ChatPoll {
    pub(crate) fn new(ctx: Arc<JobContext>) -> Self {
        Self {
            ctx,
            previous: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PollJob for ChatPoll {
    fn kind(&self) -> TaskKind {
        TaskKind::ChatPoll
    }

    async fn run(&self) -> TaskOutcome {
        let count = self.ctx.config.chat_lines;
        let result = timeout(self.ctx.config.call_timeout(), self.ctx.backends.files.chat_lines(count)).await;

        let error = match result {
            Ok(Ok(lines)) => {
                let fresh: Vec<String> = {
                    let mut previous = self.previous.lock().unwrap_or_else(PoisonError::into_inner);
                    let fresh = match previous.as_deref() {
                        Some(prev) => new_chat_lines(prev, &lines).to_vec(),
                        None => {
                            debug!(count = lines.len(), "ChatPoll::run: seeding chat window");
                            Vec::new()
                        }
                    };
                    *previous = Some(lines.clone());
                    fresh
                };

                let snap = self.ctx.container.snapshot();
                if snap.chat != lines || snap.chat_error.is_some() {
                    self.ctx.container.mutate(|mut s| {
                        s.chat = lines;
                        s.chat_error = None;
                        s
                    });
                }
                for line in fresh {
                    self.ctx.bus.publish(Event::ChatMessage { line });
                }
                return TaskOutcome::Succeeded;
            }
            Ok(Err(e)) => e.to_record(),
            Err(_) => ErrorRecord::transient("chat log read timed out"),
        };

        debug!(%error, "ChatPoll::run: failed");
        let reason = error.message.clone();
        if !same_error(&self.ctx.container.snapshot().chat_error, &error) {
            self.ctx.container.mutate(|mut s| {
                s.chat_error = Some(error);
                s
            });
        }
        TaskOutcome::failed(reason)
    }
}

/// World status from the console shard
pub(crate) struct WorldPoll {
    ctx: Arc<JobContext>,
}

impl WorldPoll {
    pub(crate) fn new(ctx: Arc<JobContext>) -> Self {
        Self { ctx }
    }

    fn fail(&self, error: ErrorRecord) -> TaskOutcome {
        warn!(%error, "WorldPoll: world status unavailable");
        let reason = error.message.clone();
        let version = self.ctx.container.mutate(|mut s| {
            s.world_error = Some(error);
            s
        });
        self.ctx.bus.publish(Event::StateChanged { version });
        TaskOutcome::failed(reason)
    }
}

#[async_trait]
impl PollJob for WorldPoll {
    fn kind(&self) -> TaskKind {
        TaskKind::WorldPoll
    }

    async fn run(&self) -> TaskOutcome {
        let console = self.ctx.config.console_shard.as_str();
        let running = self
            .ctx
            .container
            .snapshot()
            .shard(console)
            .is_some_and(|s| s.running);
        if !running {
            debug!(%console, "WorldPoll::run: console shard not running, skipping");
            return TaskOutcome::Succeeded;
        }

        let call_timeout = self.ctx.config.call_timeout();
        let result = timeout(
            self.ctx.console_deadline(),
            self.ctx.backends.query.query(console, STATUS_COMMAND, call_timeout),
        )
        .await;

        let text = match result {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return self.fail(e.to_record()),
            Err(_) => return self.fail(QueryError::Timeout(call_timeout).to_record()),
        };

        match parse_world_status(&text, Utc::now()) {
            Ok(world) => {
                debug!(season = %world.season, day = world.day, players = world.player_count, "WorldPoll::run: parsed");
                let version = self.ctx.container.mutate(|mut s| {
                    s.world = Some(world);
                    s.world_error = None;
                    s
                });
                self.ctx.bus.publish(Event::WorldUpdated { version });
                TaskOutcome::Succeeded
            }
            Err(e) => self.fail(e.to_record()),
        }
    }
}

/// Mod list from the cluster's overrides
pub(crate) struct ModsRefresh {
    ctx: Arc<JobContext>,
}

impl ModsRefresh {
    pub(crate) fn new(ctx: Arc<JobContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl PollJob for ModsRefresh {
    fn kind(&self) -> TaskKind {
        TaskKind::ModsRefresh
    }

    async fn run(&self) -> TaskOutcome {
        let result = timeout(self.ctx.config.call_timeout(), self.ctx.backends.files.mods()).await;
        let error = match result {
            Ok(Ok(mods)) => {
                let snap = self.ctx.container.snapshot();
                let changed = snap.mods != mods;
                if changed || snap.mods_error.is_some() {
                    let count = mods.len();
                    self.ctx.container.mutate(|mut s| {
                        s.mods = mods;
                        s.mods_error = None;
                        s
                    });
                    if changed {
                        self.ctx.bus.publish(Event::ModsRefreshed { count });
                    }
                }
                return TaskOutcome::Succeeded;
            }
            Ok(Err(e)) => e.to_record(),
            Err(_) => ErrorRecord::transient("mod overrides read timed out"),
        };

        debug!(%error, "ModsRefresh::run: failed");
        let reason = error.message.clone();
        if !same_error(&self.ctx.container.snapshot().mods_error, &error) {
            self.ctx.container.mutate(|mut s| {
                s.mods_error = Some(error);
                s
            });
        }
        TaskOutcome::failed(reason)
    }
}
