//! Persisted per-repo ledger sync state.
//!
//! # Responsibility
//! - Track pull/push marks, the ledger head pointer, and queued offline
//!   claims under `~/.eluent/<repo>/sync_state.json`.
//!
//! # Invariants
//! - The file is one JSON document, rewritten atomically.
//! - In-process access is serialized by an internal mutex; cross-process
//!   safety is the one-daemon-per-user workflow's concern.

use crate::git::GitAdapter;
use crate::repo::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub type StateResult<T> = Result<T, StateError>;

/// Sync-state persistence error.
#[derive(Debug)]
pub enum StateError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl Display for StateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "{err}"),
            Self::Json(err) => write!(f, "invalid sync state json: {err}"),
        }
    }
}

impl Error for StateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for StateError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for StateError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// One claim accepted locally while the ledger was unreachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineClaim {
    pub atom_id: String,
    pub agent_id: String,
    pub claimed_at: DateTime<Utc>,
}

/// Serialized shape of the sync-state file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStateData {
    #[serde(default)]
    pub last_pull_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_push_at: Option<DateTime<Utc>>,
    /// Opaque commit id of the last observed ledger head.
    #[serde(default)]
    pub ledger_head: Option<String>,
    #[serde(default)]
    pub offline_claims: Vec<OfflineClaim>,
}

/// Handle on the persisted state of one repo's ledger sync.
pub struct SyncState {
    file: PathBuf,
    worktree_dir: PathBuf,
    ledger_branch: String,
    data: Mutex<SyncStateData>,
}

impl SyncState {
    /// Loads existing state, or starts from defaults when absent.
    pub fn load(
        file: impl Into<PathBuf>,
        worktree_dir: impl Into<PathBuf>,
        ledger_branch: impl Into<String>,
    ) -> StateResult<Self> {
        let file = file.into();
        let data = match std::fs::read_to_string(&file) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => SyncStateData::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            file,
            worktree_dir: worktree_dir.into(),
            ledger_branch: ledger_branch.into(),
            data: Mutex::new(data),
        })
    }

    pub fn exists(&self) -> bool {
        self.file.exists()
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn worktree_dir(&self) -> &Path {
        &self.worktree_dir
    }

    pub fn ledger_branch(&self) -> &str {
        &self.ledger_branch
    }

    /// Persists the current state atomically.
    pub fn save(&self) -> StateResult<()> {
        let snapshot = self.snapshot();
        let json = serde_json::to_string_pretty(&snapshot)?;
        write_atomic(&self.file, json.as_bytes())?;
        Ok(())
    }

    /// Truncates state back to defaults and persists.
    pub fn reset(&self) -> StateResult<()> {
        {
            let mut data = self.lock();
            *data = SyncStateData::default();
        }
        self.save()
    }

    /// Worktree directory exists and is a checkout of the ledger branch.
    pub fn valid(&self, git: &GitAdapter) -> bool {
        if !self.worktree_dir.is_dir() {
            return false;
        }
        let head = git.run(
            &self.worktree_dir,
            &["rev-parse", "--abbrev-ref", "HEAD"],
        );
        head.success && head.output == self.ledger_branch
    }

    /// Copy of the current persisted shape.
    pub fn snapshot(&self) -> SyncStateData {
        self.lock().clone()
    }

    pub fn ledger_head(&self) -> Option<String> {
        self.lock().ledger_head.clone()
    }

    pub fn mark_pull(&self, head: Option<String>, time: DateTime<Utc>) -> StateResult<()> {
        {
            let mut data = self.lock();
            data.last_pull_at = Some(time);
            if head.is_some() {
                data.ledger_head = head;
            }
        }
        self.save()
    }

    pub fn mark_push(&self, head: Option<String>, time: DateTime<Utc>) -> StateResult<()> {
        {
            let mut data = self.lock();
            data.last_push_at = Some(time);
            if head.is_some() {
                data.ledger_head = head;
            }
        }
        self.save()
    }

    /// Records the observed ledger head without touching pull/push marks.
    pub fn set_head(&self, head: Option<String>) -> StateResult<()> {
        {
            let mut data = self.lock();
            data.ledger_head = head;
        }
        self.save()
    }

    /// Clears head and pull/push marks, keeping queued offline claims.
    pub fn clear_pointers(&self) -> StateResult<()> {
        {
            let mut data = self.lock();
            data.ledger_head = None;
            data.last_pull_at = None;
            data.last_push_at = None;
        }
        self.save()
    }

    /// Enqueues one offline claim. Claims for the same atom supersede.
    pub fn record_offline_claim(
        &self,
        atom_id: &str,
        agent_id: &str,
        claimed_at: DateTime<Utc>,
    ) -> StateResult<()> {
        {
            let mut data = self.lock();
            data.offline_claims.retain(|claim| claim.atom_id != atom_id);
            data.offline_claims.push(OfflineClaim {
                atom_id: atom_id.to_string(),
                agent_id: agent_id.to_string(),
                claimed_at,
            });
        }
        self.save()
    }

    pub fn has_offline_claims(&self) -> bool {
        !self.lock().offline_claims.is_empty()
    }

    pub fn offline_claims(&self) -> Vec<OfflineClaim> {
        self.lock().offline_claims.clone()
    }

    /// Dequeues one reconciled claim.
    pub fn remove_offline_claim(&self, atom_id: &str, agent_id: &str) -> StateResult<()> {
        {
            let mut data = self.lock();
            data.offline_claims
                .retain(|claim| !(claim.atom_id == atom_id && claim.agent_id == agent_id));
        }
        self.save()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SyncStateData> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
