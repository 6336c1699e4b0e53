//! Process control through `systemctl --user`

use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use super::UnitNaming;
use crate::domain::{ErrorRecord, UnitAction, UnitStatus};

/// Errors from the process manager
#[derive(Debug, Error)]
pub enum ProcessControlError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("unit {0} not found")]
    UnknownUnit(String),

    #[error("unexpected output from systemctl for {unit}: '{output}'")]
    Malformed { unit: String, output: String },

    #[error("systemctl {action} {unit} failed: {stderr}")]
    Failed {
        unit: String,
        action: String,
        stderr: String,
    },
}

impl ProcessControlError {
    /// Errors that will not fix themselves by retrying
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Spawn { source, .. } => source.kind() == io::ErrorKind::NotFound,
            Self::UnknownUnit(_) | Self::Malformed { .. } => true,
            Self::Failed { .. } => false,
        }
    }

    pub fn to_record(&self) -> ErrorRecord {
        if self.is_permanent() {
            ErrorRecord::permanent(self.to_string())
        } else {
            ErrorRecord::transient(self.to_string())
        }
    }
}

/// Status and control of shard processes
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Whether the shard's unit is running and enabled
    async fn status(&self, shard: &str) -> Result<UnitStatus, ProcessControlError>;

    /// Apply a control action to the shard's unit
    async fn control(&self, shard: &str, action: UnitAction) -> Result<(), ProcessControlError>;

    /// Shards whose units are enabled or running, configured or not
    async fn managed(&self) -> Result<Vec<String>, ProcessControlError>;

    /// Enable and start a unit that is not a shard, such as the grouping target
    async fn enable_now(&self, unit: &str) -> Result<(), ProcessControlError>;
}

/// `systemctl --user` backed process control
#[derive(Debug, Clone)]
pub struct Systemd {
    program: PathBuf,
    naming: UnitNaming,
}

struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl Systemd {
    pub fn new(naming: UnitNaming) -> Self {
        Self::with_program("systemctl", naming)
    }

    /// Use a specific `systemctl` binary
    pub fn with_program(program: impl Into<PathBuf>, naming: UnitNaming) -> Self {
        let program = program.into();
        debug!(?program, "Systemd::with_program: called");
        Self { program, naming }
    }

    async fn run(&self, args: &[&str]) -> Result<CommandOutput, ProcessControlError> {
        debug!(?args, "Systemd::run: called");
        let output = Command::new(&self.program)
            .arg("--user")
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ProcessControlError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    /// Shard names in the first column of a listing, filtered on the row
    ///
    /// A failed listing counts as empty.
    async fn listed(
        &self,
        args: &[&str],
        keep: impl Fn(&[&str]) -> bool,
    ) -> Result<BTreeSet<String>, ProcessControlError> {
        let output = self.run(args).await?;
        if !output.success {
            warn!(?args, stderr = %output.stderr, "Systemd::listed: listing failed");
            return Ok(BTreeSet::new());
        }
        Ok(parse_listing(&output.stdout, &self.naming, keep))
    }

    fn failure(&self, unit: String, action: &str, output: CommandOutput) -> ProcessControlError {
        warn!(%unit, %action, stderr = %output.stderr, "Systemd::failure: systemctl failed");
        if is_missing_unit(&output.stderr) {
            ProcessControlError::UnknownUnit(unit)
        } else {
            ProcessControlError::Failed {
                unit,
                action: action.to_string(),
                stderr: output.stderr,
            }
        }
    }
}

/// Shard names from `list-units` or `list-unit-files` rows whose columns pass `keep`
fn parse_listing(stdout: &str, naming: &UnitNaming, keep: impl Fn(&[&str]) -> bool) -> BTreeSet<String> {
    stdout
        .lines()
        .filter_map(|line| {
            // list-units marks failed units with a leading bullet
            let columns: Vec<&str> = line.split_whitespace().skip_while(|c| *c == "●" || *c == "*").collect();
            if columns.is_empty() || !keep(columns.as_slice()) {
                return None;
            }
            naming.shard(columns[0]).map(str::to_string)
        })
        .collect()
}

/// Map `systemctl is-active` output to "running"
///
/// `is-active` exits non-zero for anything but active, so only stdout matters.
fn parse_active(unit: &str, output: &CommandOutput) -> Result<bool, ProcessControlError> {
    match output.stdout.as_str() {
        "active" | "reloading" | "refreshing" => Ok(true),
        "inactive" | "failed" | "activating" | "deactivating" | "maintenance" => Ok(false),
        other => Err(ProcessControlError::Malformed {
            unit: unit.to_string(),
            output: other.to_string(),
        }),
    }
}

/// Map `systemctl is-enabled` output to "enabled"
fn parse_enabled(unit: &str, output: &CommandOutput) -> Result<bool, ProcessControlError> {
    match output.stdout.as_str() {
        "enabled" | "enabled-runtime" => Ok(true),
        "disabled" | "static" | "indirect" | "generated" | "transient" | "linked" | "linked-runtime" | "alias"
        | "masked" | "masked-runtime" | "bad" => Ok(false),
        "not-found" => Err(ProcessControlError::UnknownUnit(unit.to_string())),
        "" if is_missing_unit(&output.stderr) => Err(ProcessControlError::UnknownUnit(unit.to_string())),
        other => Err(ProcessControlError::Malformed {
            unit: unit.to_string(),
            output: other.to_string(),
        }),
    }
}

fn is_missing_unit(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("no such file") || stderr.contains("not found") || stderr.contains("does not exist")
}

#[async_trait]
impl ProcessControl for Systemd {
    async fn status(&self, shard: &str) -> Result<UnitStatus, ProcessControlError> {
        let unit = self.naming.unit(shard);
        debug!(%unit, "Systemd::status: called");

        let active_args = ["is-active", unit.as_str()];
        let enabled_args = ["is-enabled", unit.as_str()];
        let (active, enabled) = tokio::join!(self.run(&active_args), self.run(&enabled_args));
        let enabled = parse_enabled(&unit, &enabled?)?;
        let running = parse_active(&unit, &active?)?;

        Ok(UnitStatus { running, enabled })
    }

    async fn control(&self, shard: &str, action: UnitAction) -> Result<(), ProcessControlError> {
        let unit = self.naming.unit(shard);
        debug!(%unit, %action, "Systemd::control: called");

        let args = [action.verb(), unit.as_str()];
        let output = self.run(&args).await?;
        if output.success {
            return Ok(());
        }
        Err(self.failure(unit, action.verb(), output))
    }

    async fn managed(&self) -> Result<Vec<String>, ProcessControlError> {
        let pattern = self.naming.pattern();
        debug!(%pattern, "Systemd::managed: called");

        let files_args = ["list-unit-files", "--no-legend", pattern.as_str()];
        let units_args = ["list-units", "--no-legend", "--plain", "--state", "active", pattern.as_str()];
        let (enabled, running) = tokio::join!(
            self.listed(&files_args, |columns| columns.get(1) == Some(&"enabled")),
            self.listed(&units_args, |_| true)
        );

        let mut managed = enabled?;
        managed.extend(running?);
        Ok(managed.into_iter().collect())
    }

    async fn enable_now(&self, unit: &str) -> Result<(), ProcessControlError> {
        debug!(%unit, "Systemd::enable_now: called");
        let args = ["enable", "--now", unit];
        let output = self.run(&args).await?;
        if output.success {
            return Ok(());
        }
        Err(self.failure(unit.to_string(), "enable --now", output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::tempdir;

    /// Write an executable `systemctl` stand-in into `dir`
    fn fake_systemctl(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("systemctl");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    const STATUS_SCRIPT: &str = r#"
case "$2:$3" in
  "is-active:dontstarve@Master.service") echo active; exit 0 ;;
  "is-enabled:dontstarve@Master.service") echo enabled; exit 0 ;;
  "is-active:dontstarve@Caves.service") echo inactive; exit 3 ;;
  "is-enabled:dontstarve@Caves.service") echo disabled; exit 1 ;;
  "is-active:"*) echo inactive; exit 3 ;;
  "is-enabled:"*) echo "Failed to get unit file state for $3: No such file or directory" >&2; exit 1 ;;
  "start:dontstarve@Master.service") exit 0 ;;
  *) echo "Unit $3 not found." >&2; exit 5 ;;
esac
"#;

    #[tokio::test]
    async fn test_status_running_and_enabled() {
        let temp = tempdir().unwrap();
        let systemd = Systemd::with_program(fake_systemctl(temp.path(), STATUS_SCRIPT), UnitNaming::default());

        let status = systemd.status("Master").await.unwrap();
        assert_eq!(
            status,
            UnitStatus {
                running: true,
                enabled: true
            }
        );
    }

    #[tokio::test]
    async fn test_status_nonzero_exit_is_not_an_error() {
        let temp = tempdir().unwrap();
        let systemd = Systemd::with_program(fake_systemctl(temp.path(), STATUS_SCRIPT), UnitNaming::default());

        let status = systemd.status("Caves").await.unwrap();
        assert_eq!(status, UnitStatus::default());
    }

    #[tokio::test]
    async fn test_status_unknown_unit_is_permanent() {
        let temp = tempdir().unwrap();
        let systemd = Systemd::with_program(fake_systemctl(temp.path(), STATUS_SCRIPT), UnitNaming::default());

        let err = systemd.status("Forest").await.unwrap_err();
        assert!(matches!(err, ProcessControlError::UnknownUnit(ref u) if u == "dontstarve@Forest.service"));
        assert!(err.to_record().is_permanent());
    }

    #[tokio::test]
    async fn test_status_garbage_output_is_malformed() {
        let temp = tempdir().unwrap();
        let systemd = Systemd::with_program(fake_systemctl(temp.path(), "echo bogus"), UnitNaming::default());

        let err = systemd.status("Master").await.unwrap_err();
        assert!(matches!(err, ProcessControlError::Malformed { .. }));
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_control_success_and_failure() {
        let temp = tempdir().unwrap();
        let systemd = Systemd::with_program(fake_systemctl(temp.path(), STATUS_SCRIPT), UnitNaming::default());

        systemd.control("Master", UnitAction::Start).await.unwrap();

        let err = systemd.control("Master", UnitAction::Stop).await.unwrap_err();
        assert!(matches!(err, ProcessControlError::UnknownUnit(_)));
    }

    #[tokio::test]
    async fn test_control_failure_is_transient() {
        let temp = tempdir().unwrap();
        let script = fake_systemctl(temp.path(), "echo 'Job failed. See journal.' >&2; exit 1");
        let systemd = Systemd::with_program(script, UnitNaming::default());

        let err = systemd.control("Master", UnitAction::Restart).await.unwrap_err();
        match &err {
            ProcessControlError::Failed { action, stderr, .. } => {
                assert_eq!(action, "restart");
                assert!(stderr.contains("Job failed"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!err.to_record().is_permanent());
    }

    const LISTING_SCRIPT: &str = r#"
case "$2" in
  list-unit-files)
    echo "dontstarve@.service        static   -"
    echo "dontstarve@Master.service  enabled  enabled"
    echo "dontstarve@Old.service     enabled  enabled"
    echo "dontstarve@Caves.service   disabled enabled"
    ;;
  list-units)
    echo "dontstarve@Master.service loaded active running Master"
    echo "dontstarve@Stale.service  loaded active running Stale"
    ;;
  enable)
    [ "$3" = "--now" ] && [ "$4" = "dontstarve.target" ] && exit 0
    echo "Unit $4 not found." >&2; exit 5 ;;
esac
"#;

    #[tokio::test]
    async fn test_managed_is_enabled_or_running() {
        let temp = tempdir().unwrap();
        let systemd = Systemd::with_program(fake_systemctl(temp.path(), LISTING_SCRIPT), UnitNaming::default());

        let managed = systemd.managed().await.unwrap();
        assert_eq!(managed, vec!["Master", "Old", "Stale"]);
    }

    #[tokio::test]
    async fn test_managed_failed_listing_is_empty() {
        let temp = tempdir().unwrap();
        let systemd = Systemd::with_program(fake_systemctl(temp.path(), "exit 1"), UnitNaming::default());

        assert!(systemd.managed().await.unwrap().is_empty());
    }

    #[test]
    fn test_parse_listing_skips_bullets_and_foreign_units() {
        let stdout = "● dontstarve@Caves.service loaded failed failed Caves\nsshd.service loaded active running SSH\n";
        let shards = parse_listing(stdout, &UnitNaming::default(), |_| true);
        assert_eq!(shards.into_iter().collect::<Vec<_>>(), vec!["Caves"]);
    }

    #[tokio::test]
    async fn test_enable_now() {
        let temp = tempdir().unwrap();
        let systemd = Systemd::with_program(fake_systemctl(temp.path(), LISTING_SCRIPT), UnitNaming::default());

        systemd.enable_now("dontstarve.target").await.unwrap();
        let err = systemd.enable_now("other.target").await.unwrap_err();
        assert!(matches!(err, ProcessControlError::UnknownUnit(ref u) if u == "other.target"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_permanent() {
        let temp = tempdir().unwrap();
        let systemd = Systemd::with_program(temp.path().join("no-such-systemctl"), UnitNaming::default());

        let err = systemd.status("Master").await.unwrap_err();
        assert!(matches!(err, ProcessControlError::Spawn { .. }));
        assert!(err.is_permanent());
    }
}
