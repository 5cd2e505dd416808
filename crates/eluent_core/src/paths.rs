//! Repo-local and global filesystem layout.
//!
//! # Responsibility
//! - Name every file the tracker reads or writes, in one place.
//!
//! # Invariants
//! - Repo-local state lives under `<repo>/.eluent/`.
//! - Global state lives under `~/.eluent/`, one subdirectory per repo name.

use std::path::{Path, PathBuf};

/// Per-repo state directory name.
pub const DATA_DIR_NAME: &str = ".eluent";
/// Append-friendly JSONL data file.
pub const DATA_FILE_NAME: &str = "data.jsonl";
/// Per-repo configuration file.
pub const CONFIG_FILE_NAME: &str = "config.yaml";
/// Global repo-name registry file.
pub const REGISTRY_FILE_NAME: &str = "repos.jsonl";
/// Per-repo ledger sync state file.
pub const SYNC_STATE_FILE_NAME: &str = "sync_state.json";
/// Per-repo ledger worktree directory.
pub const WORKTREE_DIR_NAME: &str = "worktree";

/// Paths inside one tracked repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoPaths {
    root: PathBuf,
}

impl RepoPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Repository working-tree root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/.eluent`.
    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR_NAME)
    }

    /// `<root>/.eluent/data.jsonl`.
    pub fn data_file(&self) -> PathBuf {
        self.data_dir().join(DATA_FILE_NAME)
    }

    /// `<root>/.eluent/config.yaml`.
    pub fn config_file(&self) -> PathBuf {
        self.data_dir().join(CONFIG_FILE_NAME)
    }

    /// Data-file path relative to the repo root, as git sees it.
    pub fn data_file_repo_relative(&self) -> String {
        format!("{DATA_DIR_NAME}/{DATA_FILE_NAME}")
    }
}

/// Paths under the per-user global state directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalPaths {
    home: PathBuf,
}

impl GlobalPaths {
    /// Discovers `~/.eluent` from the user's home directory.
    pub fn discover() -> Option<Self> {
        dirs::home_dir().map(|home| Self {
            home: home.join(DATA_DIR_NAME),
        })
    }

    /// Uses an explicit base directory. Tests point this at a temp dir.
    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self { home: base.into() }
    }

    /// Global state root (`~/.eluent`).
    pub fn base(&self) -> &Path {
        &self.home
    }

    /// `~/.eluent/repos.jsonl`.
    pub fn registry_file(&self) -> PathBuf {
        self.home.join(REGISTRY_FILE_NAME)
    }

    /// `~/.eluent/<repo>`.
    pub fn repo_state_dir(&self, repo_name: &str) -> PathBuf {
        self.home.join(repo_name)
    }

    /// `~/.eluent/<repo>/sync_state.json`.
    pub fn sync_state_file(&self, repo_name: &str) -> PathBuf {
        self.repo_state_dir(repo_name).join(SYNC_STATE_FILE_NAME)
    }

    /// `~/.eluent/<repo>/worktree`.
    pub fn sync_worktree_dir(&self, repo_name: &str) -> PathBuf {
        self.repo_state_dir(repo_name).join(WORKTREE_DIR_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::{GlobalPaths, RepoPaths};
    use std::path::Path;

    #[test]
    fn repo_paths_compose_under_data_dir() {
        let paths = RepoPaths::new("/work/proj");
        assert_eq!(paths.data_dir(), Path::new("/work/proj/.eluent"));
        assert_eq!(paths.data_file(), Path::new("/work/proj/.eluent/data.jsonl"));
        assert_eq!(paths.data_file_repo_relative(), ".eluent/data.jsonl");
    }

    #[test]
    fn global_paths_compose_per_repo_dirs() {
        let global = GlobalPaths::with_base("/home/u/.eluent");
        assert_eq!(
            global.sync_state_file("proj"),
            Path::new("/home/u/.eluent/proj/sync_state.json")
        );
        assert_eq!(
            global.sync_worktree_dir("proj"),
            Path::new("/home/u/.eluent/proj/worktree")
        );
        assert_eq!(
            global.registry_file(),
            Path::new("/home/u/.eluent/repos.jsonl")
        );
    }
}
