//! fishmanager configuration types and loading

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use eyre::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{Backends, ClusterDir, FifoConsole, Journal, ScriptUpdater, Systemd, UnitNaming};
use crate::coordinator::CoordinatorConfig;

/// Shards managed when neither the config nor the legacy shards file names any
pub const DEFAULT_SHARDS: [&str; 2] = ["Master", "Caves"];

/// Main fishmanager configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Shard names in display order; empty falls back to the legacy shards file
    pub shards: Vec<String>,

    /// Log level for the log file, overridden by `--log-level`
    pub log_level: Option<String>,

    /// Append every event to the JSONL event journal
    pub journal: bool,

    pub systemd: SystemdConfig,

    pub server: ServerConfig,

    pub coordinator: CoordinatorConfig,
}

/// How shards map onto systemd user units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SystemdConfig {
    pub unit_prefix: String,
    pub unit_suffix: String,
    /// Unit grouping every shard, enabled by `fm sync`
    pub target: String,
    pub systemctl: PathBuf,
    pub journalctl: PathBuf,
}

impl Default for SystemdConfig {
    fn default() -> Self {
        let naming = UnitNaming::default();
        Self {
            unit_prefix: naming.prefix,
            unit_suffix: naming.suffix,
            target: "dontstarve.target".to_string(),
            systemctl: PathBuf::from("systemctl"),
            journalctl: PathBuf::from("journalctl"),
        }
    }
}

impl SystemdConfig {
    pub fn naming(&self) -> UnitNaming {
        UnitNaming::new(&self.unit_prefix, &self.unit_suffix)
    }
}

/// Game install locations; anything unset is resolved at startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServerConfig {
    /// Klei data directory holding the clusters
    pub dst_dir: Option<PathBuf>,
    pub cluster_name: Option<String>,
    /// Directory holding the `dst-<shard>.fifo` console pipes
    pub fifo_dir: Option<PathBuf>,
    /// Update script
    pub updater: Option<PathBuf>,
}

/// Concrete paths after defaults and legacy settings are applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerPaths {
    pub cluster_dir: PathBuf,
    pub fifo_dir: PathBuf,
    pub updater: PathBuf,
}

impl Config {
    /// Load configuration with fallback chain
    ///
    /// An explicit path must load. Otherwise `./.fishmanager.yml`, then
    /// `~/.config/fishmanager/fishmanager.yml`, then the defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".fishmanager.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => warn!("Failed to load config from {}: {}", local_config.display(), e),
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("fishmanager").join("fishmanager.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => warn!("Failed to load config from {}: {}", user_config.display(), e),
                }
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Configured shard names, deduplicated, in order
    pub fn shard_names(&self) -> Result<Vec<String>> {
        self.shard_names_with(&LegacyConfig::default_location())
    }

    fn shard_names_with(&self, legacy: &LegacyConfig) -> Result<Vec<String>> {
        let mut names = if self.shards.is_empty() {
            legacy.shards()?
        } else {
            self.shards.clone()
        };
        if names.is_empty() {
            debug!("Config::shard_names: none configured, using defaults");
            names = DEFAULT_SHARDS.iter().map(|s| s.to_string()).collect();
        }

        let mut seen = Vec::with_capacity(names.len());
        for name in names {
            let name = name.trim().to_string();
            if name.is_empty() || seen.contains(&name) {
                continue;
            }
            seen.push(name);
        }
        Ok(seen)
    }

    /// Resolve game paths: config, then the legacy game config, then defaults
    pub fn server_paths(&self) -> Result<ServerPaths> {
        self.server_paths_with(&home_dir(), &LegacyConfig::default_location())
    }

    fn server_paths_with(&self, home: &Path, legacy: &LegacyConfig) -> Result<ServerPaths> {
        let mut game = legacy.game_settings()?;

        let dst_dir = self
            .server
            .dst_dir
            .clone()
            .or_else(|| game.remove("DONTSTARVE_DIR").map(PathBuf::from))
            .unwrap_or_else(|| home.join(".klei").join("DoNotStarveTogether"));
        let cluster_name = self
            .server
            .cluster_name
            .clone()
            .or_else(|| game.remove("CLUSTER_NAME"))
            .unwrap_or_else(|| "MyDediServer".to_string());

        Ok(ServerPaths {
            cluster_dir: dst_dir.join(cluster_name),
            fifo_dir: self
                .server
                .fifo_dir
                .clone()
                .unwrap_or_else(|| home.join(".cache").join("dontstarve")),
            updater: self
                .server
                .updater
                .clone()
                .unwrap_or_else(|| home.join(".local").join("bin").join("dst-updater")),
        })
    }

    /// The production collaborators for this configuration
    pub fn backends(&self) -> Result<Backends> {
        let paths = self.server_paths()?;
        debug!(?paths, "Config::backends: called");
        let naming = self.systemd.naming();
        Ok(Backends {
            process: Arc::new(Systemd::with_program(&self.systemd.systemctl, naming.clone())),
            logs: Arc::new(Journal::with_program(&self.systemd.journalctl, naming)),
            query: Arc::new(FifoConsole::new(
                paths.fifo_dir,
                &paths.cluster_dir,
                &self.coordinator.console_shard,
            )),
            files: Arc::new(ClusterDir::new(&paths.cluster_dir)),
            updater: Arc::new(ScriptUpdater::new(paths.updater)),
        })
    }
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

static ASSIGNMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*([^#\s=]+)\s*=\s*"?([^"]*)"?"#).expect("valid assignment regex"));
static VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{(\w+)\}|\$(\w+)").expect("valid variable regex"));

/// Settings kept by the older shell tooling in `~/.config/dontstarve`
#[derive(Debug, Clone)]
struct LegacyConfig {
    dir: PathBuf,
}

impl LegacyConfig {
    fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn default_location() -> Self {
        Self::new(home_dir().join(".config").join("dontstarve"))
    }

    /// `shards.conf`: one name per line, `#` starts a comment line
    fn shards(&self) -> Result<Vec<String>> {
        let path = self.dir.join("shards.conf");
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).context(format!("Failed to read {}", path.display()))?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(String::from)
            .collect())
    }

    /// `config`: shell-style `KEY="value"` lines with `$VAR` expansion
    fn game_settings(&self) -> Result<HashMap<String, String>> {
        let path = self.dir.join("config");
        if !path.is_file() {
            return Ok(HashMap::new());
        }
        let content = fs::read_to_string(&path).context(format!("Failed to read {}", path.display()))?;
        let mut settings = HashMap::new();
        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(c) = ASSIGNMENT.captures(line) {
                settings.insert(c[1].to_string(), expand_vars(c[2].trim_end()));
            }
        }
        Ok(settings)
    }
}

/// Expand `$VAR` and `${VAR}`; unset variables are left as written
fn expand_vars(value: &str) -> String {
    VARIABLE
        .replace_all(value, |c: &regex::Captures| {
            let name = c.get(1).or_else(|| c.get(2)).map_or("", |m| m.as_str());
            std::env::var(name).unwrap_or_else(|_| c[0].to_string())
        })
        .into_owned()
}
