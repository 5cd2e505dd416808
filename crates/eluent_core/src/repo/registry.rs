//! Global repo-name registry.
//!
//! # Responsibility
//! - Persist the name -> path mapping under `~/.eluent/repos.jsonl`.
//!
//! # Invariants
//! - `register` drops prior entries matching the new name *or* path.
//! - Rewrites are atomic (temp file + fsync + rename); last writer wins
//!   across processes.
//! - Malformed lines are skipped, never fatal.

use crate::repo::write_atomic;
use chrono::{DateTime, Utc};
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::BufRead;
use std::path::{Path, PathBuf};

static REPO_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_-]{0,31}$").expect("valid repo name regex"));

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Registry persistence error.
#[derive(Debug)]
pub enum RegistryError {
    InvalidName(String),
    RelativePath(PathBuf),
    Io(std::io::Error),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(name) => write!(f, "invalid repo name: `{name}`"),
            Self::RelativePath(path) => {
                write!(f, "registry paths must be absolute, got `{}`", path.display())
            }
            Self::Io(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// One registered repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    pub registered_at: DateTime<Utc>,
}

/// Durable, last-write-wins mapping from repo name to absolute path.
pub struct RepoRegistry {
    file: PathBuf,
    entries: Vec<RegistryEntry>,
}

impl RepoRegistry {
    /// Loads the registry file; a missing file yields an empty registry.
    pub fn load(file: impl Into<PathBuf>) -> RegistryResult<Self> {
        let file = file.into();
        let mut entries = Vec::new();

        match std::fs::File::open(&file) {
            Ok(handle) => {
                for (line_number, line) in std::io::BufReader::new(handle).lines().enumerate() {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<RegistryEntry>(&line) {
                        Ok(entry) => entries.push(entry),
                        Err(err) => warn!(
                            "event=registry_load module=repo status=skipped_line file={} line={} error={}",
                            file.display(),
                            line_number + 1,
                            err
                        ),
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        Ok(Self { file, entries })
    }

    /// Registers a repository, superseding entries with the same name or
    /// path, and rewrites the file atomically.
    pub fn register(
        &mut self,
        name: &str,
        path: &Path,
        remote: Option<String>,
    ) -> RegistryResult<RegistryEntry> {
        if !REPO_NAME_RE.is_match(name) {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        if !path.is_absolute() {
            return Err(RegistryError::RelativePath(path.to_path_buf()));
        }

        self.entries
            .retain(|entry| entry.name != name && entry.path != path);
        let entry = RegistryEntry {
            name: name.to_string(),
            path: path.to_path_buf(),
            remote,
            registered_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        self.save()?;
        Ok(entry)
    }

    /// Removes a repository by name. Returns whether anything was removed.
    pub fn unregister(&mut self, name: &str) -> RegistryResult<bool> {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.name != name);
        let removed = self.entries.len() != before;
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn find_by_path(&self, path: &Path) -> Option<&RegistryEntry> {
        self.entries.iter().find(|entry| entry.path == path)
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    fn save(&self) -> RegistryResult<()> {
        let mut contents = String::new();
        for entry in &self.entries {
            match serde_json::to_string(entry) {
                Ok(line) => {
                    contents.push_str(&line);
                    contents.push('\n');
                }
                Err(err) => warn!(
                    "event=registry_save module=repo status=skipped_entry name={} error={}",
                    entry.name, err
                ),
            }
        }
        write_atomic(&self.file, contents.as_bytes())?;
        Ok(())
    }
}
