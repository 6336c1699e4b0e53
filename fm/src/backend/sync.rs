//! Bring the host's shard units in line with the configured shard list

use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info};

use super::{ProcessControl, ProcessControlError};
use crate::domain::UnitAction;

/// What a sync step acted on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTarget {
    Shard(String),
    /// The unit grouping all shards
    Group(String),
}

impl std::fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shard(shard) => write!(f, "{}", shard),
            Self::Group(unit) => write!(f, "{}", unit),
        }
    }
}

/// One systemctl call made by a sync and how it went
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStep {
    pub target: SyncTarget,
    /// `None` for `enable --now` on the group unit
    pub action: Option<UnitAction>,
    pub result: Result<(), String>,
}

impl SyncStep {
    pub fn verb(&self) -> &'static str {
        match self.action {
            Some(action) => action.verb(),
            None => "enable --now",
        }
    }
}

async fn bounded<F>(limit: Duration, call: F) -> Result<(), String>
where
    F: Future<Output = Result<(), ProcessControlError>>,
{
    match timeout(limit, call).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(_) => Err(format!("timed out after {:?}", limit)),
    }
}

/// Enable and start every desired shard, stop and disable every other
/// managed one, then enable the group unit
///
/// Each call gets `limit`; a failed call is recorded and the sync carries on.
pub async fn sync_shards(
    process: &dyn ProcessControl,
    desired: &[String],
    group: &str,
    limit: Duration,
) -> Vec<SyncStep> {
    debug!(?desired, %group, "sync_shards: called");
    let mut steps = Vec::new();

    let managed = match timeout(limit, process.managed()).await {
        Ok(Ok(managed)) => managed,
        Ok(Err(e)) => {
            steps.push(SyncStep {
                target: SyncTarget::Group(group.to_string()),
                action: None,
                result: Err(format!("could not list units: {}", e)),
            });
            return steps;
        }
        Err(_) => {
            steps.push(SyncStep {
                target: SyncTarget::Group(group.to_string()),
                action: None,
                result: Err(format!("listing units timed out after {:?}", limit)),
            });
            return steps;
        }
    };

    for shard in desired {
        for action in [UnitAction::Enable, UnitAction::Start] {
            let result = bounded(limit, process.control(shard, action)).await;
            steps.push(SyncStep {
                target: SyncTarget::Shard(shard.clone()),
                action: Some(action),
                result,
            });
        }
    }

    for shard in managed.iter().filter(|s| !desired.contains(s)) {
        info!(%shard, "sync_shards: retiring unlisted shard");
        for action in [UnitAction::Stop, UnitAction::Disable] {
            let result = bounded(limit, process.control(shard, action)).await;
            steps.push(SyncStep {
                target: SyncTarget::Shard(shard.clone()),
                action: Some(action),
                result,
            });
        }
    }

    let result = bounded(limit, process.enable_now(group)).await;
    steps.push(SyncStep {
        target: SyncTarget::Group(group.to_string()),
        action: None,
        result,
    });
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockProcess;

    fn names(shards: &[&str]) -> Vec<String> {
        shards.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_sync_starts_desired_and_retires_unlisted() {
        let process = MockProcess::new().with_managed(&["Master", "Old"]);
        let desired = names(&["Master", "Caves"]);
        let steps = sync_shards(&process, &desired, "dontstarve.target", Duration::from_secs(1)).await;

        assert_eq!(
            process.controls(),
            vec![
                ("Master".to_string(), UnitAction::Enable),
                ("Master".to_string(), UnitAction::Start),
                ("Caves".to_string(), UnitAction::Enable),
                ("Caves".to_string(), UnitAction::Start),
                ("Old".to_string(), UnitAction::Stop),
                ("Old".to_string(), UnitAction::Disable),
            ]
        );
        assert_eq!(process.enabled_units(), vec!["dontstarve.target"]);
        assert_eq!(steps.len(), 7);
        assert!(steps.iter().all(|s| s.result.is_ok()));
        assert_eq!(steps[6].verb(), "enable --now");
    }

    #[tokio::test]
    async fn test_sync_keeps_going_after_failures() {
        let process = MockProcess::new().with_managed(&["Old"]);
        process.fail_controls("Job failed");
        let desired = names(&["Master"]);
        let steps = sync_shards(&process, &desired, "dontstarve.target", Duration::from_secs(1)).await;

        let failed: Vec<_> = steps.iter().filter(|s| s.result.is_err()).collect();
        assert_eq!(failed.len(), 4);
        assert_eq!(process.enabled_units(), vec!["dontstarve.target"]);
        assert!(steps.last().is_some_and(|s| s.result.is_ok()));
    }
}
