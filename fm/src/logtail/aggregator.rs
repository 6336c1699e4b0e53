//! Live log following with per-shard ring buffers

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::ring::LogRing;
use crate::backend::LogSource;
use crate::domain::ErrorRecord;
use crate::events::{Event, EventBus};
use crate::state::StateContainer;

type Rings = Arc<Mutex<HashMap<String, LogRing>>>;

/// Read-only view of the buffered log lines, cheap to clone
#[derive(Debug, Clone)]
pub struct LogReader {
    rings: Rings,
}

impl LogReader {
    /// Buffered lines for `shard`, oldest first; empty for unknown shards
    pub fn lines(&self, shard: &str) -> Vec<String> {
        let rings = self.rings.lock().unwrap_or_else(PoisonError::into_inner);
        rings.get(shard).map(LogRing::lines).unwrap_or_default()
    }
}

/// Settings for the aggregator
#[derive(Debug, Clone)]
pub struct LogTailConfig {
    /// Lines kept per shard
    pub capacity: usize,
    /// History lines requested when a follow starts
    pub backlog: usize,
    /// Limit on opening the log source
    pub open_timeout: Duration,
}

/// Owns one ring per shard and at most one follow task per shard
///
/// Not shared: the coordinator owns it and calls it from its actor loop.
pub struct LogTailAggregator {
    source: Arc<dyn LogSource>,
    container: Arc<StateContainer>,
    bus: Arc<EventBus>,
    config: LogTailConfig,
    rings: Rings,
    follows: HashMap<String, JoinHandle<()>>,
}

impl LogTailAggregator {
    pub fn new(
        source: Arc<dyn LogSource>,
        container: Arc<StateContainer>,
        bus: Arc<EventBus>,
        config: LogTailConfig,
    ) -> Self {
        debug!(capacity = config.capacity, backlog = config.backlog, "LogTailAggregator::new: called");
        let rings = container
            .snapshot()
            .shard_names()
            .map(|name| (name.to_string(), LogRing::new(config.capacity)))
            .collect();
        Self {
            source,
            container,
            bus,
            config,
            rings: Arc::new(Mutex::new(rings)),
            follows: HashMap::new(),
        }
    }

    pub fn reader(&self) -> LogReader {
        LogReader {
            rings: self.rings.clone(),
        }
    }

    pub fn lines(&self, shard: &str) -> Vec<String> {
        self.reader().lines(shard)
    }

    pub fn is_following(&self, shard: &str) -> bool {
        self.follows.get(shard).is_some_and(|h| !h.is_finished())
    }

    /// Shards with a live follow task
    pub fn following(&self) -> Vec<String> {
        let mut shards: Vec<String> = self
            .follows
            .iter()
            .filter(|(_, h)| !h.is_finished())
            .map(|(s, _)| s.clone())
            .collect();
        shards.sort();
        shards
    }

    /// Start following `shard`; a no-op when it is already being followed
    pub fn start_follow(&mut self, shard: &str) {
        debug!(%shard, "LogTailAggregator::start_follow: called");
        if self.is_following(shard) {
            debug!(%shard, "LogTailAggregator::start_follow: already following");
            return;
        }

        {
            let mut rings = self.rings.lock().unwrap_or_else(PoisonError::into_inner);
            rings
                .entry(shard.to_string())
                .or_insert_with(|| LogRing::new(self.config.capacity))
                .clear();
        }

        let task = FollowTask {
            shard: shard.to_string(),
            source: self.source.clone(),
            container: self.container.clone(),
            bus: self.bus.clone(),
            rings: self.rings.clone(),
            backlog: self.config.backlog,
            open_timeout: self.config.open_timeout,
        };
        info!(%shard, "LogTailAggregator::start_follow: following log");
        self.follows.insert(shard.to_string(), tokio::spawn(task.run()));
    }

    /// Stop following `shard` and wait for the follow task to end
    ///
    /// Once this returns no further `LogLine` for the shard is published. The
    /// ring keeps its lines. Safe to call when not following.
    pub async fn stop_follow(&mut self, shard: &str) {
        debug!(%shard, "LogTailAggregator::stop_follow: called");
        let Some(handle) = self.follows.remove(shard) else {
            return;
        };
        let was_live = !handle.is_finished();
        handle.abort();
        if let Err(e) = handle.await {
            if e.is_panic() {
                warn!(%shard, "LogTailAggregator::stop_follow: follow task panicked");
            }
        }
        if was_live {
            info!(%shard, "LogTailAggregator::stop_follow: stopped");
            self.bus.publish(Event::LogEnded {
                shard: shard.to_string(),
                error: None,
            });
        }
    }

    pub async fn stop_all(&mut self) {
        debug!(count = self.follows.len(), "LogTailAggregator::stop_all: called");
        let shards: Vec<String> = self.follows.keys().cloned().collect();
        for shard in shards {
            self.stop_follow(&shard).await;
        }
    }
}

/// Everything one follow task needs, moved into the task
struct FollowTask {
    shard: String,
    source: Arc<dyn LogSource>,
    container: Arc<StateContainer>,
    bus: Arc<EventBus>,
    rings: Rings,
    backlog: usize,
    open_timeout: Duration,
}

impl FollowTask {
    async fn run(self) {
        let opened = timeout(self.open_timeout, self.source.tail(&self.shard, self.backlog, true)).await;
        let mut stream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return self.fail(e.to_record()),
            Err(_) => {
                return self.fail(ErrorRecord::transient(format!(
                    "log source did not open within {:?}",
                    self.open_timeout
                )));
            }
        };

        let shard = self.shard.as_str();
        self.container.mutate(|s| s.with_shard(shard, |sh| sh.log_error = None));

        while let Some(item) = stream.next().await {
            match item {
                Ok(line) => {
                    // No await between buffering and publishing: an abort
                    // can never separate the two
                    {
                        let mut rings = self.rings.lock().unwrap_or_else(PoisonError::into_inner);
                        if let Some(ring) = rings.get_mut(shard) {
                            ring.push(line.clone());
                        }
                    }
                    self.bus.publish(Event::LogLine {
                        shard: shard.to_string(),
                        line,
                    });
                }
                Err(e) => return self.fail(e.to_record()),
            }
        }

        debug!(%shard, "FollowTask::run: log source ended");
        self.bus.publish(Event::LogEnded {
            shard: self.shard.clone(),
            error: None,
        });
    }

    fn fail(&self, error: ErrorRecord) {
        warn!(shard = %self.shard, %error, "FollowTask::fail: log unavailable");
        let message = error.message.clone();
        let shard = self.shard.as_str();
        self.container.mutate(|s| s.with_shard(shard, |sh| sh.log_error = Some(error)));
        self.bus.publish(Event::LogEnded {
            shard: self.shard.clone(),
            error: Some(message),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockLogSource;
    use crate::events::EventKind;
    use std::sync::mpsc as std_mpsc;
    use std::time::Instant;

    struct Fixture {
        source: Arc<MockLogSource>,
        container: Arc<StateContainer>,
        bus: Arc<EventBus>,
        aggregator: LogTailAggregator,
    }

    fn fixture(capacity: usize) -> Fixture {
        let source = Arc::new(MockLogSource::new());
        let container = Arc::new(StateContainer::with_shards(&["Master", "Caves"]));
        let bus = Arc::new(EventBus::new());
        let aggregator = LogTailAggregator::new(
            source.clone(),
            container.clone(),
            bus.clone(),
            LogTailConfig {
                capacity,
                backlog: 10,
                open_timeout: Duration::from_secs(1),
            },
        );
        Fixture {
            source,
            container,
            bus,
            aggregator,
        }
    }

    /// Poll until `check` holds or five seconds pass
    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_follow_buffers_and_publishes_lines() {
        let mut f = fixture(100);
        f.source.set_backlog("Master", &["old 1", "old 2"]);
        let (tx, rx) = std_mpsc::channel();
        f.bus
            .subscribe(EventKind::LogLine, move |e| {
                tx.send(e.clone())?;
                Ok(())
            })
            .unwrap();

        f.aggregator.start_follow("Master");
        assert!(f.aggregator.is_following("Master"));
        assert!(eventually(|| f.source.push("Master", "live")).await);
        assert!(eventually(|| f.aggregator.lines("Master").len() == 3).await);
        assert_eq!(f.aggregator.lines("Master"), vec!["old 1", "old 2", "live"]);

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(
            first,
            Event::LogLine {
                shard: "Master".to_string(),
                line: "old 1".to_string()
            }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ring_is_bounded() {
        let mut f = fixture(3);
        f.source.set_backlog("Master", &["1", "2", "3", "4", "5"]);
        f.aggregator.start_follow("Master");

        assert!(eventually(|| f.aggregator.lines("Master") == vec!["3", "4", "5"]).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_follow_twice_is_noop() {
        let mut f = fixture(10);
        f.aggregator.start_follow("Master");
        f.aggregator.start_follow("Master");
        assert!(eventually(|| f.source.tails() == 1).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.source.tails(), 1);
        assert_eq!(f.aggregator.following(), vec!["Master"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_follow_releases_source_and_keeps_ring() {
        let mut f = fixture(10);
        f.aggregator.start_follow("Master");
        assert!(eventually(|| f.source.push("Master", "kept")).await);
        assert!(eventually(|| f.aggregator.lines("Master") == vec!["kept"]).await);

        f.aggregator.stop_follow("Master").await;
        assert!(!f.aggregator.is_following("Master"));
        assert!(!f.source.push("Master", "dropped"), "stream should be released");
        assert_eq!(f.aggregator.lines("Master"), vec!["kept"]);

        // Stopping again is harmless
        f.aggregator.stop_follow("Master").await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_restart_clears_ring() {
        let mut f = fixture(10);
        f.source.set_backlog("Master", &["a"]);
        f.aggregator.start_follow("Master");
        assert!(eventually(|| f.aggregator.lines("Master") == vec!["a"]).await);
        f.aggregator.stop_follow("Master").await;

        f.source.set_backlog("Master", &["b"]);
        f.aggregator.start_follow("Master");
        assert!(eventually(|| f.aggregator.lines("Master") == vec!["b"]).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unavailable_source_sets_log_error() {
        let mut f = fixture(10);
        f.source.set_unavailable("Caves", Some("journal rotated away"));
        let (tx, rx) = std_mpsc::channel();
        f.bus
            .subscribe(EventKind::LogEnded, move |e| {
                tx.send(e.clone())?;
                Ok(())
            })
            .unwrap();

        f.aggregator.start_follow("Caves");
        let ended = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        match ended {
            Event::LogEnded { shard, error } => {
                assert_eq!(shard, "Caves");
                assert!(error.unwrap().contains("journal rotated away"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        let snap = f.container.snapshot();
        assert!(snap.shard("Caves").unwrap().log_error.is_some());
        assert!(snap.shard("Caves").unwrap().last_error.is_none());
        assert!(eventually(|| !f.aggregator.is_following("Caves")).await);

        // A later start retries and clears the error
        f.source.set_unavailable("Caves", None);
        f.aggregator.start_follow("Caves");
        assert!(eventually(|| f.container.snapshot().shard("Caves").unwrap().log_error.is_none()).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_source_closing_ends_follow() {
        let mut f = fixture(10);
        f.aggregator.start_follow("Master");
        assert!(eventually(|| f.source.push("Master", "x")).await);
        f.source.close("Master");
        assert!(eventually(|| !f.aggregator.is_following("Master")).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_all() {
        let mut f = fixture(10);
        f.aggregator.start_follow("Master");
        f.aggregator.start_follow("Caves");
        assert_eq!(f.aggregator.following().len(), 2);

        f.aggregator.stop_all().await;
        assert!(f.aggregator.following().is_empty());
    }
}
