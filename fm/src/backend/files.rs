//! Files in the cluster directory: chat log and mod overrides

use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::domain::{ErrorRecord, ModEntry};

#[derive(Debug, Error)]
pub enum FilesError {
    #[error("{0} not found")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FilesError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn to_record(&self) -> ErrorRecord {
        if self.is_permanent() {
            ErrorRecord::permanent(self.to_string())
        } else {
            ErrorRecord::transient(self.to_string())
        }
    }
}

/// Read access to the cluster's chat log and mod configuration
#[async_trait]
pub trait ClusterFiles: Send + Sync {
    /// The last `count` lines of the chat log, oldest first
    async fn chat_lines(&self, count: usize) -> Result<Vec<String>, FilesError>;

    /// Mods listed in the mod overrides
    async fn mods(&self) -> Result<Vec<ModEntry>, FilesError>;
}

/// A cluster directory such as `~/.klei/DoNotStarveTogether/MyDediServer`
#[derive(Debug, Clone)]
pub struct ClusterDir {
    root: PathBuf,
    master: String,
}

impl ClusterDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        debug!(?root, "ClusterDir::new: called");
        Self {
            root,
            master: "Master".to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn chat_log_path(&self) -> PathBuf {
        self.root.join(&self.master).join("server_chat_log.txt")
    }

    pub fn mod_overrides_path(&self) -> PathBuf {
        self.root.join(&self.master).join("modoverrides.lua")
    }
}

async fn read_lossy(path: &Path) -> Result<String, FilesError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(FilesError::NotFound(path.to_path_buf())),
        Err(source) => Err(FilesError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[async_trait]
impl ClusterFiles for ClusterDir {
    async fn chat_lines(&self, count: usize) -> Result<Vec<String>, FilesError> {
        let path = self.chat_log_path();
        debug!(?path, count, "ClusterDir::chat_lines: called");

        let content = read_lossy(&path).await?;
        let lines: Vec<&str> = content.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        let start = lines.len().saturating_sub(count);
        Ok(lines[start..].iter().map(|l| l.to_string()).collect())
    }

    async fn mods(&self) -> Result<Vec<ModEntry>, FilesError> {
        let path = self.mod_overrides_path();
        debug!(?path, "ClusterDir::mods: called");
        let content = read_lossy(&path).await?;
        Ok(parse_mod_overrides(&content))
    }
}

static MOD_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\[\s*"([^"]+)"\s*\]\s*=\s*\{"#).expect("valid mod key regex"));
static ENABLED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\benabled\s*=\s*(true|false)").expect("valid enabled regex"));

/// Parse the entries of a `modoverrides.lua` table
///
/// Each entry looks like `["workshop-378160973"]={ configuration_options={...}, enabled=true }`.
/// The last `enabled` assignment before the next entry wins, which skips any
/// `enabled` keys nested inside `configuration_options`.
pub fn parse_mod_overrides(content: &str) -> Vec<ModEntry> {
    let keys: Vec<_> = MOD_KEY
        .captures_iter(content)
        .filter_map(|c| Some((c.get(0)?.end(), c.get(1)?.as_str().to_string())))
        .collect();

    keys.iter()
        .enumerate()
        .map(|(i, (body_start, id))| {
            let body_end = keys.get(i + 1).map(|(next, _)| *next).unwrap_or(content.len());
            let body = &content[*body_start..body_end];
            let enabled = ENABLED
                .captures_iter(body)
                .last()
                .map(|c| &c[1] == "true")
                .unwrap_or(false);
            ModEntry { id: id.clone(), enabled }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const OVERRIDES: &str = r#"
return {
  ["workshop-378160973"]={
    configuration_options={ ["Global Positions"]=true, ENABLEPINGS=true },
    enabled=true
  },
  ["workshop-666155465"]={ configuration_options={ }, enabled=false },
  ["workshop-1185229307"]={ enabled=true }
}
"#;

    #[test]
    fn test_parse_mod_overrides() {
        let mods = parse_mod_overrides(OVERRIDES);
        assert_eq!(
            mods,
            vec![
                ModEntry {
                    id: "workshop-378160973".to_string(),
                    enabled: true
                },
                ModEntry {
                    id: "workshop-666155465".to_string(),
                    enabled: false
                },
                ModEntry {
                    id: "workshop-1185229307".to_string(),
                    enabled: true
                },
            ]
        );
    }

    #[test]
    fn test_parse_empty_overrides() {
        assert!(parse_mod_overrides("return {}").is_empty());
    }

    #[tokio::test]
    async fn test_chat_lines_returns_tail() {
        let temp = tempdir().unwrap();
        let cluster = ClusterDir::new(temp.path());
        fs::create_dir_all(temp.path().join("Master")).unwrap();
        fs::write(cluster.chat_log_path(), "[Say] a\n[Say] b\n\n[Say] c\n").unwrap();

        let lines = cluster.chat_lines(2).await.unwrap();
        assert_eq!(lines, vec!["[Say] b", "[Say] c"]);

        let all = cluster.chat_lines(50).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_chat_log_is_permanent() {
        let temp = tempdir().unwrap();
        let cluster = ClusterDir::new(temp.path());

        let err = cluster.chat_lines(10).await.unwrap_err();
        assert!(matches!(err, FilesError::NotFound(_)));
        assert!(err.to_record().is_permanent());
    }

    #[tokio::test]
    async fn test_mods_from_file() {
        let temp = tempdir().unwrap();
        let cluster = ClusterDir::new(temp.path());
        fs::create_dir_all(temp.path().join("Master")).unwrap();
        fs::write(cluster.mod_overrides_path(), OVERRIDES).unwrap();

        let mods = cluster.mods().await.unwrap();
        assert_eq!(mods.len(), 3);
        assert_eq!(mods.iter().filter(|m| m.enabled).count(), 2);
    }
}
