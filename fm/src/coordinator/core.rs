//! Main Coordinator task implementation

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::config::CoordinatorConfig;
use super::handle::CoordinatorHandle;
use super::jobs::{ChatPoll, JobContext, ModsRefresh, StatusPoll, WorldPoll};
use super::messages::CoordRequest;
use super::task::{PollJob, TaskBoard, TaskKind, TaskRunner};
use crate::backend::{Backends, QueryError, announce_command};
use crate::domain::UnitAction;
use crate::events::{Event, EventBus};
use crate::logtail::{LogTailAggregator, LogTailConfig};
use crate::state::StateContainer;

/// Keeps `pending_actions` raised for as long as one control call is in flight
struct PendingAction {
    container: Arc<StateContainer>,
}

impl PendingAction {
    fn begin(container: &Arc<StateContainer>) -> Self {
        container.mutate(|mut s| {
            s.pending_actions += 1;
            s
        });
        Self {
            container: container.clone(),
        }
    }
}

impl Drop for PendingAction {
    fn drop(&mut self) {
        self.container.mutate(|mut s| {
            s.pending_actions = s.pending_actions.saturating_sub(1);
            s
        });
    }
}

/// Owns the periodic tasks, the log followers and every in-flight user command
pub struct Coordinator {
    ctx: Arc<JobContext>,
    rx: mpsc::Receiver<CoordRequest>,
    aggregator: LogTailAggregator,
    board: TaskBoard,
    refresh: HashMap<TaskKind, Arc<Notify>>,
    shutdown_tx: watch::Sender<bool>,
    commands: JoinSet<()>,
    updating: Arc<AtomicBool>,
}

impl Coordinator {
    /// Create the coordinator and the first handle to it
    ///
    /// Nothing runs until [`Coordinator::run`] is spawned. The coordinator
    /// stops on `shutdown()` or once every handle has been dropped.
    pub fn new(
        config: CoordinatorConfig,
        container: Arc<StateContainer>,
        bus: Arc<EventBus>,
        backends: Backends,
    ) -> (Self, CoordinatorHandle) {
        debug!(?config, "Coordinator::new: called");
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let (shutdown_tx, _) = watch::channel(false);

        let aggregator = LogTailAggregator::new(
            backends.logs.clone(),
            container.clone(),
            bus.clone(),
            LogTailConfig {
                capacity: config.log_ring_capacity,
                backlog: config.log_backlog,
                open_timeout: config.call_timeout(),
            },
        );
        let board = TaskBoard::default();
        let refresh = TaskKind::ALL.iter().map(|k| (*k, Arc::new(Notify::new()))).collect();
        let handle = CoordinatorHandle::new(tx, container.clone(), aggregator.reader(), board.clone());

        let coordinator = Self {
            ctx: Arc::new(JobContext {
                container,
                bus,
                backends,
                config,
            }),
            rx,
            aggregator,
            board,
            refresh,
            shutdown_tx,
            commands: JoinSet::new(),
            updating: Arc::new(AtomicBool::new(false)),
        };
        (coordinator, handle)
    }

    /// Buffered log lines for `shard`, oldest first
    pub fn log_lines(&self, shard: &str) -> Vec<String> {
        self.aggregator.lines(shard)
    }

    fn refresh_signal(&self, kind: TaskKind) -> Arc<Notify> {
        self.refresh.get(&kind).cloned().unwrap_or_default()
    }

    fn spawn_runners(&self) -> JoinSet<()> {
        let jobs: Vec<Arc<dyn PollJob>> = vec![
            Arc::new(StatusPoll::new(self.ctx.clone())),
            Arc::new(ChatPoll::new(self.ctx.clone())),
            Arc::new(WorldPoll::new(self.ctx.clone())),
            Arc::new(ModsRefresh::new(self.ctx.clone())),
        ];

        let mut runners = JoinSet::new();
        for job in jobs {
            let kind = job.kind();
            let Some(period) = self.ctx.config.period(kind) else {
                info!(%kind, "Coordinator: task disabled");
                continue;
            };
            let runner = TaskRunner::new(
                job,
                period,
                self.board.clone(),
                self.refresh_signal(kind),
                self.shutdown_tx.subscribe(),
            );
            runners.spawn(runner.run());
        }
        runners
    }

    /// Run until shutdown is requested or every handle is gone
    pub async fn run(mut self) {
        info!(shards = self.ctx.container.snapshot().shards.len(), "Coordinator started");
        let mut runners = self.spawn_runners();

        loop {
            tokio::select! {
                req = self.rx.recv() => match req {
                    Some(CoordRequest::Shutdown) => {
                        info!("Coordinator: shutdown requested");
                        break;
                    }
                    Some(req) => self.handle(req).await,
                    None => {
                        info!("Coordinator: all handles dropped");
                        break;
                    }
                },
                Some(joined) = self.commands.join_next(), if !self.commands.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("Coordinator: command task panicked");
                        }
                    }
                }
            }
        }

        self.shutdown(&mut runners).await;
    }

    async fn handle(&mut self, req: CoordRequest) {
        debug!(request = req.name(), "Coordinator::handle: called");
        match req {
            CoordRequest::Refresh { kind } => {
                if self.ctx.config.period(kind).is_some() {
                    self.refresh_signal(kind).notify_one();
                } else {
                    debug!(%kind, "Coordinator::handle: refresh of disabled task ignored");
                }
            }

            CoordRequest::Control { shard, action } => {
                if self.check_shard(action.verb(), &shard) {
                    self.spawn_control(shard, action);
                }
            }

            CoordRequest::ControlAll { action } => self.spawn_control_all(action),

            CoordRequest::ToggleEnable { shard } => {
                let enabled = self.ctx.container.snapshot().shard(&shard).map(|s| s.enabled);
                match enabled {
                    Some(true) => self.spawn_control(shard, UnitAction::Disable),
                    Some(false) => self.spawn_control(shard, UnitAction::Enable),
                    None => self.reject_unknown("toggle-enable", &shard),
                }
            }

            CoordRequest::FollowLogs { shard } => {
                if !self.check_shard("follow", &shard) {
                    return;
                }
                if self.ctx.config.single_live_follow {
                    for other in self.aggregator.following() {
                        if other != shard {
                            self.aggregator.stop_follow(&other).await;
                        }
                    }
                }
                self.aggregator.start_follow(&shard);
            }

            CoordRequest::StopFollow { shard } => self.aggregator.stop_follow(&shard).await,

            CoordRequest::Following { reply } => {
                let _ = reply.send(self.aggregator.following());
            }

            CoordRequest::Console { command } => self.spawn_console("console", command),

            CoordRequest::Announce { message } => self.spawn_console("announce", announce_command(&message)),

            CoordRequest::RunUpdate => self.spawn_update(),

            // Handled by the run loop
            CoordRequest::Shutdown => {}
        }
    }

    /// True for a configured shard; otherwise rejects the command
    fn check_shard(&self, command: &str, shard: &str) -> bool {
        let known = self.ctx.container.snapshot().shard(shard).is_some();
        if !known {
            self.reject_unknown(command, shard);
        }
        known
    }

    fn reject_unknown(&self, command: &str, shard: &str) {
        error!(%command, %shard, "Coordinator: unknown shard");
        self.ctx.bus.publish(Event::CommandCompleted {
            command: command.to_string(),
            target: Some(shard.to_string()),
            success: false,
            message: format!("unknown shard '{}'", shard),
        });
    }

    fn spawn_control(&mut self, shard: String, action: UnitAction) {
        let ctx = self.ctx.clone();
        let status_refresh = self.refresh_signal(TaskKind::StatusPoll);
        self.commands.spawn(async move {
            let result = control(&ctx, &shard, action).await;
            let (success, message) = match result {
                Ok(()) => (true, format!("{} {}: ok", action.verb(), shard)),
                Err(e) => (false, e),
            };
            ctx.bus.publish(Event::CommandCompleted {
                command: action.verb().to_string(),
                target: Some(shard),
                success,
                message,
            });
            status_refresh.notify_one();
        });
    }

    fn spawn_control_all(&mut self, action: UnitAction) {
        let ctx = self.ctx.clone();
        let status_refresh = self.refresh_signal(TaskKind::StatusPoll);
        self.commands.spawn(async move {
            let shards: Vec<String> = ctx.container.snapshot().shard_names().map(String::from).collect();
            let mut failures = Vec::new();
            for shard in &shards {
                if let Err(e) = control(&ctx, shard, action).await {
                    failures.push(e);
                }
            }

            let success = failures.is_empty();
            let message = if success {
                format!("{} all: ok ({} shards)", action.verb(), shards.len())
            } else {
                failures.join("; ")
            };
            ctx.bus.publish(Event::CommandCompleted {
                command: action.verb().to_string(),
                target: None,
                success,
                message,
            });
            status_refresh.notify_one();
        });
    }

    fn spawn_console(&mut self, name: &'static str, command: String) {
        let ctx = self.ctx.clone();
        self.commands.spawn(async move {
            let shard = ctx.config.console_shard.clone();
            let call_timeout = ctx.config.call_timeout();
            debug!(%shard, %command, "Coordinator: console command");

            let result = match timeout(ctx.console_deadline(), ctx.backends.query.query(&shard, &command, call_timeout)).await {
                Ok(result) => result,
                Err(_) => Err(QueryError::Timeout(call_timeout)),
            };
            let (success, message) = match result {
                Ok(response) => (true, response.trim_end().to_string()),
                Err(e) => {
                    warn!(%shard, error = %e, "Coordinator: console command failed");
                    (false, e.to_string())
                }
            };
            ctx.bus.publish(Event::CommandCompleted {
                command: name.to_string(),
                target: Some(shard),
                success,
                message,
            });
        });
    }

    fn spawn_update(&mut self) {
        if self.updating.swap(true, Ordering::SeqCst) {
            warn!("Coordinator: update already running");
            self.ctx.bus.publish(Event::CommandCompleted {
                command: "update".to_string(),
                target: None,
                success: false,
                message: "update already running".to_string(),
            });
            return;
        }

        let ctx = self.ctx.clone();
        let updating = self.updating.clone();
        self.commands.spawn(async move {
            info!("Coordinator: running updater");
            let bus = ctx.bus.clone();
            let mut on_line = move |line: String| bus.publish(Event::UpdaterOutput { line });
            let limit = ctx.config.update_timeout();

            let (success, message) = match timeout(limit, ctx.backends.updater.run(&mut on_line)).await {
                Ok(Ok(())) => (true, "update finished".to_string()),
                Ok(Err(e)) => (false, e.to_string()),
                Err(_) => (false, format!("update timed out after {:?}", limit)),
            };
            updating.store(false, Ordering::SeqCst);
            if success {
                info!("Coordinator: update finished");
            } else {
                warn!(%message, "Coordinator: update failed");
            }
            ctx.bus.publish(Event::CommandCompleted {
                command: "update".to_string(),
                target: None,
                success,
                message,
            });
        });
    }

    async fn shutdown(mut self, runners: &mut JoinSet<()>) {
        debug!(commands = self.commands.len(), runners = runners.len(), "Coordinator::shutdown: called");
        self.shutdown_tx.send_replace(true);
        self.rx.close();

        self.aggregator.stop_all().await;
        self.commands.shutdown().await;

        let drained = timeout(self.ctx.config.call_timeout(), async {
            while runners.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Coordinator: task loops did not stop in time, aborting");
            runners.shutdown().await;
        }
        info!("Coordinator stopped");
    }
}

/// One control call under the control timeout, with `pending_actions` raised
async fn control(ctx: &JobContext, shard: &str, action: UnitAction) -> Result<(), String> {
    let _pending = PendingAction::begin(&ctx.container);
    let limit = ctx.config.control_timeout();
    match timeout(limit, ctx.backends.process.control(shard, action)).await {
        Ok(Ok(())) => {
            info!(%shard, action = action.verb(), "Coordinator: control succeeded");
            Ok(())
        }
        Ok(Err(e)) => {
            warn!(%shard, action = action.verb(), error = %e, "Coordinator: control failed");
            Err(e.to_string())
        }
        Err(_) => {
            warn!(%shard, action = action.verb(), "Coordinator: control timed out");
            Err(format!("{} {} timed out after {:?}", action.verb(), shard, limit))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockFiles, MockLogSource, MockProcess, MockQuery, MockUpdater, StatusBehavior};
    use crate::coordinator::CoordError;
    use crate::domain::UnitStatus;
    use crate::events::EventKind;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use tokio::time::{Instant, sleep};

    struct Harness {
        handle: CoordinatorHandle,
        container: Arc<StateContainer>,
        bus: Arc<EventBus>,
        process: Arc<MockProcess>,
        logs: Arc<MockLogSource>,
        query: Arc<MockQuery>,
        task: JoinHandle<()>,
    }

    /// Every periodic task disabled unless the test turns it on
    fn quiet_config() -> CoordinatorConfig {
        CoordinatorConfig {
            status_period_ms: 0,
            chat_period_ms: 0,
            world_period_ms: 0,
            mods_period_ms: 0,
            call_timeout_ms: 200,
            control_timeout_ms: 200,
            ..Default::default()
        }
    }

    fn start(config: CoordinatorConfig, process: MockProcess, updater: MockUpdater) -> Harness {
        let container = Arc::new(StateContainer::with_shards(&["Master", "Caves"]));
        let bus = Arc::new(EventBus::new());
        let process = Arc::new(process);
        let logs = Arc::new(MockLogSource::new());
        let query = Arc::new(MockQuery::new());
        let backends = Backends {
            process: process.clone(),
            logs: logs.clone(),
            query: query.clone(),
            files: Arc::new(MockFiles::new()),
            updater: Arc::new(updater),
        };
        let (coordinator, handle) = Coordinator::new(config, container.clone(), bus.clone(), backends);
        let task = tokio::spawn(coordinator.run());
        Harness {
            handle,
            container,
            bus,
            process,
            logs,
            query,
            task,
        }
    }

    fn collect(bus: &EventBus, kind: EventKind) -> std_mpsc::Receiver<Event> {
        let (tx, rx) = std_mpsc::channel();
        bus.subscribe(kind, move |e| {
            tx.send(e.clone())?;
            Ok(())
        })
        .unwrap();
        rx
    }

    async fn eventually(what: &str, check: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !check() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            sleep(Duration::from_millis(10)).await;
        }
    }

    fn completed(rx: &std_mpsc::Receiver<Event>) -> (String, Option<String>, bool, String) {
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            Event::CommandCompleted {
                command,
                target,
                success,
                message,
            } => (command, target, success, message),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_master_running_caves_timing_out() {
        let config = CoordinatorConfig {
            status_period_ms: 50,
            ..quiet_config()
        };
        let process = MockProcess::new()
            .with(
                "Master",
                StatusBehavior::Report(UnitStatus {
                    running: true,
                    enabled: true,
                }),
            )
            .with("Caves", StatusBehavior::Hang);
        let h = start(config, process, MockUpdater::default());
        let updates = collect(&h.bus, EventKind::StatusUpdate);

        let container = h.container.clone();
        eventually("caves error", move || {
            container.snapshot().shard("Caves").unwrap().last_error.is_some()
        })
        .await;

        let snap = h.container.snapshot();
        let master = snap.shard("Master").unwrap();
        assert!(master.running && master.enabled && master.last_error.is_none());
        let caves = snap.shard("Caves").unwrap();
        assert!(!caves.running);
        assert!(caves.last_checked.is_none());
        assert_eq!(snap.error_count(), 1);

        let event = updates.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event.shard(), Some("Master"));

        h.handle.shutdown().await.unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_is_prompt_with_hanging_collaborators() {
        let config = CoordinatorConfig {
            status_period_ms: 10,
            world_period_ms: 10,
            ..quiet_config()
        };
        let process = MockProcess::new().with("Master", StatusBehavior::Hang).with("Caves", StatusBehavior::Hang);
        let h = start(config, process, MockUpdater::default());
        h.query.hang();
        sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        h.handle.shutdown().await.unwrap();
        h.task.await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(h.handle.refresh(TaskKind::StatusPoll), Err(CoordError::Closed));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dropping_every_handle_stops_the_coordinator() {
        let h = start(quiet_config(), MockProcess::new(), MockUpdater::default());
        let task = h.task;
        drop(h.handle);
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_follow_stop_then_follow_other_shard() {
        let h = start(quiet_config(), MockProcess::new(), MockUpdater::default());
        let lines = collect(&h.bus, EventKind::LogLine);
        h.logs.set_backlog("Master", &["m1", "m2"]);
        h.logs.set_backlog("Caves", &["c1"]);

        h.handle.follow_logs("Master").unwrap();
        let reader = h.handle.clone();
        eventually("master backlog", move || reader.log_lines("Master").len() == 2).await;
        assert!(h.logs.push("Master", "m3"));
        let reader = h.handle.clone();
        eventually("master live line", move || reader.log_lines("Master").len() == 3).await;

        h.handle.stop_follow("Master").unwrap();
        h.handle.follow_logs("Caves").unwrap();
        assert_eq!(h.handle.following().await.unwrap(), vec!["Caves"]);

        let before = h.handle.log_lines("Master");
        assert!(!h.logs.push("Master", "m4"), "master stream must be dropped");
        let reader = h.handle.clone();
        eventually("caves backlog", move || reader.log_lines("Caves") == vec!["c1"]).await;
        assert_eq!(h.handle.log_lines("Master"), before);

        let first: Vec<Event> = (0..4).map(|_| lines.recv_timeout(Duration::from_secs(5)).unwrap()).collect();
        let master_lines: Vec<&str> = first
            .iter()
            .filter_map(|e| match e {
                Event::LogLine { shard, line } if shard == "Master" => Some(line.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(master_lines, vec!["m1", "m2", "m3"]);
        assert_eq!(first[3].shard(), Some("Caves"));
        assert!(lines.try_iter().all(|e| e.shard() != Some("Master")));

        h.handle.shutdown().await.unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_single_live_follow_stops_other_shard() {
        let h = start(quiet_config(), MockProcess::new(), MockUpdater::default());
        let ended = collect(&h.bus, EventKind::LogEnded);

        h.handle.follow_logs("Master").unwrap();
        h.handle.follow_logs("Caves").unwrap();
        assert_eq!(h.handle.following().await.unwrap(), vec!["Caves"]);
        let event = ended.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(
            event,
            Event::LogEnded {
                shard: "Master".to_string(),
                error: None
            }
        );

        h.handle.shutdown().await.unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_multiple_follows_when_policy_disabled() {
        let config = CoordinatorConfig {
            single_live_follow: false,
            ..quiet_config()
        };
        let h = start(config, MockProcess::new(), MockUpdater::default());

        h.handle.follow_logs("Master").unwrap();
        h.handle.follow_logs("Caves").unwrap();
        assert_eq!(h.handle.following().await.unwrap(), vec!["Caves", "Master"]);

        h.handle.shutdown().await.unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_shard_is_rejected() {
        let h = start(quiet_config(), MockProcess::new(), MockUpdater::default());
        let done = collect(&h.bus, EventKind::CommandCompleted);

        h.handle.control("Forest", UnitAction::Start).unwrap();
        let (command, target, success, message) = completed(&done);
        assert_eq!(command, "start");
        assert_eq!(target.as_deref(), Some("Forest"));
        assert!(!success);
        assert!(message.contains("unknown shard"));
        assert!(h.process.controls().is_empty());

        h.handle.follow_logs("Forest").unwrap();
        assert!(!completed(&done).2);
        assert!(h.handle.following().await.unwrap().is_empty());

        h.handle.shutdown().await.unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_control_reports_and_clears_pending() {
        let h = start(quiet_config(), MockProcess::new(), MockUpdater::default());
        let done = collect(&h.bus, EventKind::CommandCompleted);

        h.handle.control("Master", UnitAction::Restart).unwrap();
        let (command, target, success, _) = completed(&done);
        assert_eq!(command, "restart");
        assert_eq!(target.as_deref(), Some("Master"));
        assert!(success);
        assert_eq!(h.process.controls(), vec![("Master".to_string(), UnitAction::Restart)]);
        let container = h.container.clone();
        eventually("pending cleared", move || container.snapshot().pending_actions == 0).await;

        h.process.fail_controls("Access denied");
        h.handle.control_all(UnitAction::Stop).unwrap();
        let (command, target, success, message) = completed(&done);
        assert_eq!(command, "stop");
        assert_eq!(target, None);
        assert!(!success);
        assert!(message.contains("Access denied"));
        assert_eq!(h.process.controls().len(), 3);

        h.handle.shutdown().await.unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_control_forces_status_refresh() {
        let config = CoordinatorConfig {
            status_period_ms: 60_000,
            ..quiet_config()
        };
        let h = start(config, MockProcess::new(), MockUpdater::default());
        let process = h.process.clone();
        eventually("first status tick", move || process.status_calls() == 2).await;

        h.handle.control("Caves", UnitAction::Start).unwrap();
        let process = h.process.clone();
        eventually("refreshed status", move || process.status_calls() == 4).await;

        h.handle.shutdown().await.unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_toggle_enable_uses_current_state() {
        let h = start(quiet_config(), MockProcess::new(), MockUpdater::default());
        let done = collect(&h.bus, EventKind::CommandCompleted);
        h.container.mutate(|s| s.with_shard("Caves", |sh| sh.enabled = true));

        h.handle.toggle_enable("Master").unwrap();
        assert_eq!(completed(&done).0, "enable");
        h.handle.toggle_enable("Caves").unwrap();
        assert_eq!(completed(&done).0, "disable");

        h.handle.shutdown().await.unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_announce_escapes_quotes() {
        let h = start(quiet_config(), MockProcess::new(), MockUpdater::default());
        let done = collect(&h.bus, EventKind::CommandCompleted);
        h.query.respond("Announcement sent\n");

        h.handle.announce(r#"say "hi""#).unwrap();
        let (command, target, success, message) = completed(&done);
        assert_eq!(command, "announce");
        assert_eq!(target.as_deref(), Some("Master"));
        assert!(success);
        assert_eq!(message, "Announcement sent");
        assert_eq!(h.query.commands()[0].1, r#"c_announce("say \"hi\"")"#);

        h.handle.shutdown().await.unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_console_timeout_is_reported() {
        let h = start(quiet_config(), MockProcess::new(), MockUpdater::default());
        let done = collect(&h.bus, EventKind::CommandCompleted);
        h.query.hang();

        h.handle.console("c_save()").unwrap();
        let (command, _, success, message) = completed(&done);
        assert_eq!(command, "console");
        assert!(!success);
        assert!(message.contains("no response"));

        h.handle.shutdown().await.unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_publishes_output_then_completion() {
        let updater = MockUpdater {
            lines: vec!["Downloading".to_string(), "Success!".to_string()],
            fail: false,
        };
        let h = start(quiet_config(), MockProcess::new(), updater);
        let output = collect(&h.bus, EventKind::UpdaterOutput);
        let done = collect(&h.bus, EventKind::CommandCompleted);

        h.handle.run_update().unwrap();
        let (command, _, success, _) = completed(&done);
        assert_eq!(command, "update");
        assert!(success);
        let lines: Vec<Event> = (0..2).map(|_| output.recv_timeout(Duration::from_secs(5)).unwrap()).collect();
        assert_eq!(
            lines,
            vec![
                Event::UpdaterOutput {
                    line: "Downloading".to_string()
                },
                Event::UpdaterOutput {
                    line: "Success!".to_string()
                },
            ]
        );

        h.handle.shutdown().await.unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_refresh_runs_task_and_updates_stats() {
        let config = CoordinatorConfig {
            status_period_ms: 60_000,
            ..quiet_config()
        };
        let h = start(config, MockProcess::new(), MockUpdater::default());
        let handle = h.handle.clone();
        eventually("first run", move || {
            handle.task_stats().iter().any(|(k, s)| *k == TaskKind::StatusPoll && s.runs == 1)
        })
        .await;

        h.handle.refresh(TaskKind::StatusPoll).unwrap();
        let handle = h.handle.clone();
        eventually("second run", move || {
            handle.task_stats().iter().any(|(k, s)| *k == TaskKind::StatusPoll && s.runs == 2)
        })
        .await;

        h.handle.shutdown().await.unwrap();
        h.task.await.unwrap();
    }
}
