//! Repo configuration loading.
//!
//! # Responsibility
//! - Parse `.eluent/config.yaml` into typed settings.
//!
//! # Invariants
//! - A missing config file yields defaults; a malformed one is an error.
//! - `sync.ledger_branch` presence is what enables ledger sync.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

/// Default sync remote name.
pub const DEFAULT_REMOTE: &str = "origin";
/// Default optimistic claim/push retry budget.
pub const DEFAULT_CLAIM_RETRIES: u32 = 5;

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration load error.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "{err}"),
            Self::Yaml(err) => write!(f, "invalid config yaml: {err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Yaml(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Yaml(value)
    }
}

/// Ledger sync settings. Presence of the block enables sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Dedicated branch carrying claim and mutation records.
    pub ledger_branch: String,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_claim_retries")]
    pub claim_retries: u32,
    /// Claims older than this are treated as forfeit. Unset never expires.
    #[serde(default)]
    pub claim_timeout_hours: Option<u32>,
}

fn default_remote() -> String {
    DEFAULT_REMOTE.to_string()
}

fn default_claim_retries() -> u32 {
    DEFAULT_CLAIM_RETRIES
}

/// Per-repo configuration file contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Repo name used as the atom-id prefix. Falls back to the directory
    /// basename when unset.
    #[serde(default)]
    pub repo_name: Option<String>,
    #[serde(default)]
    pub sync: Option<SyncConfig>,
}

impl RepoConfig {
    /// Loads configuration, treating a missing file as defaults.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(serde_yaml::from_str(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    /// Returns whether ledger sync is configured.
    pub fn sync_enabled(&self) -> bool {
        self.sync.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::{RepoConfig, DEFAULT_CLAIM_RETRIES, DEFAULT_REMOTE};

    #[test]
    fn minimal_sync_block_fills_defaults() {
        let config: RepoConfig = serde_yaml::from_str(
            "repo_name: proj\nsync:\n  ledger_branch: eluent-ledger\n",
        )
        .expect("config should parse");

        assert_eq!(config.repo_name.as_deref(), Some("proj"));
        let sync = config.sync.expect("sync block should be present");
        assert_eq!(sync.ledger_branch, "eluent-ledger");
        assert_eq!(sync.remote, DEFAULT_REMOTE);
        assert_eq!(sync.claim_retries, DEFAULT_CLAIM_RETRIES);
        assert_eq!(sync.claim_timeout_hours, None);
    }

    #[test]
    fn absent_sync_block_disables_sync() {
        let config: RepoConfig =
            serde_yaml::from_str("repo_name: proj\n").expect("config should parse");
        assert!(!config.sync_enabled());
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = RepoConfig::load(&dir.path().join("config.yaml")).expect("load should succeed");
        assert_eq!(config, RepoConfig::default());
    }
}
