//! History-based restoration of compacted atoms.
//!
//! # Responsibility
//! - Walk version-control history of the data file to recover
//!   pre-compaction content.
//!
//! # Invariants
//! - `restored_at` is written after all content, so its absence flags a
//!   partial restore that is safe to resume.
//! - Restoration resets the compaction tier to 0.

use crate::git::GitAdapter;
use crate::model::atom::{
    Atom, META_COMPACTED_AT, META_COMPACTION_TIER, META_ORIGINAL_COMMENT_COUNT,
    META_ORIGINAL_DESCRIPTION_LEN, META_RESTORED_AT, META_RESTORED_FROM_COMMIT,
};
use crate::model::comment::Comment;
use crate::model::record::Record;
use crate::repo::cache::SharedRepository;
use crate::repo::data_file::{RepoError, Repository};
use chrono::{DateTime, Utc};
use log::info;
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Default cap on history commits examined per restore.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

pub type RestoreResult<T> = Result<T, RestoreError>;

/// Restoration failure.
#[derive(Debug)]
pub enum RestoreError {
    NotCompacted { atom_id: String },
    HistoryNotFound { atom_id: String },
    AtomNotFound { atom_id: String },
    Repo(RepoError),
}

impl Display for RestoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotCompacted { atom_id } => {
                write!(f, "Atom has not been compacted: {atom_id}")
            }
            Self::HistoryNotFound { atom_id } => write!(
                f,
                "Could not find pre-compaction version in git history: {atom_id}"
            ),
            Self::AtomNotFound { atom_id } => write!(f, "atom not found: {atom_id}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RestoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for RestoreError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// What one successful restore recovered.
#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub atom_id: String,
    pub restored_from_commit: String,
    pub description_chars: usize,
    pub comments_restored: usize,
}

struct HistoricalContent {
    commit: String,
    atom: Atom,
    comments: Vec<Comment>,
}

/// Recovers pre-compaction content from data-file history.
pub struct Restorer {
    repo: SharedRepository,
    git: GitAdapter,
    history_limit: usize,
}

impl Restorer {
    pub fn new(repo: SharedRepository, git: GitAdapter) -> Self {
        Self {
            repo,
            git,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Overrides the history cap. Items compacted more than `limit`
    /// data-file commits after their last mutation cannot be restored.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Restores one compacted atom from history.
    ///
    /// Explicitly non-atomic: `restored_at` is written last, so a partial
    /// run leaves it absent and a re-run completes the recovery.
    pub fn restore(&self, atom_id: &str) -> RestoreResult<RestoreReport> {
        let mut repo = self.write_repo();

        let atom = repo
            .find_atom(atom_id)
            .ok_or_else(|| RestoreError::AtomNotFound {
                atom_id: atom_id.to_string(),
            })?;
        if !atom.is_compacted() {
            return Err(RestoreError::NotCompacted {
                atom_id: atom_id.to_string(),
            });
        }

        let compacted_at = atom
            .metadata
            .get(META_COMPACTED_AT)
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|parsed| parsed.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let content = self
            .find_pre_compaction_content(&repo, atom_id, compacted_at)
            .ok_or_else(|| RestoreError::HistoryNotFound {
                atom_id: atom_id.to_string(),
            })?;

        let mut restored = atom;
        restored.description = content.atom.description.clone();
        restored.metadata.remove(META_COMPACTION_TIER);
        restored.metadata.remove(META_COMPACTED_AT);
        restored.metadata.remove(META_ORIGINAL_DESCRIPTION_LEN);
        restored.metadata.remove(META_ORIGINAL_COMMENT_COUNT);
        restored.metadata.insert(
            META_RESTORED_FROM_COMMIT.to_string(),
            Value::from(content.commit.clone()),
        );
        let restored = repo.update_atom(restored)?;

        // Drop the synthetic summary before re-creating history.
        repo.compact_comments(atom_id, None)?;
        for comment in &content.comments {
            repo.restore_comment(comment.clone())?;
        }

        // Written last: detects partial restores.
        let mut finished = restored;
        finished.metadata.insert(
            META_RESTORED_AT.to_string(),
            Value::from(Utc::now().to_rfc3339()),
        );
        let finished = repo.update_atom(finished)?;

        info!(
            "event=restore module=compact status=ok atom_id={atom_id} commit={} comments={}",
            content.commit,
            content.comments.len()
        );
        Ok(RestoreReport {
            atom_id: atom_id.to_string(),
            restored_from_commit: content.commit,
            description_chars: finished.description.chars().count(),
            comments_restored: content.comments.len(),
        })
    }

    /// Whether a restore would succeed. False on any failure.
    pub fn can_restore(&self, atom_id: &str) -> bool {
        let repo = self
            .repo
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(atom) = repo.find_atom(atom_id) else {
            return false;
        };
        if !atom.is_compacted() {
            return false;
        }
        let compacted_at = atom
            .metadata
            .get(META_COMPACTED_AT)
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|parsed| parsed.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        self.find_pre_compaction_content(&repo, atom_id, compacted_at)
            .is_some()
    }

    /// Up to `history_limit` data-file commits before `compacted_at`,
    /// most-recent first.
    fn find_commits_before(
        &self,
        repo: &Repository,
        compacted_at: DateTime<Utc>,
    ) -> Vec<String> {
        let limit = self.history_limit.to_string();
        let before = compacted_at.to_rfc3339();
        let data_rel = repo.paths().data_file_repo_relative();
        let log = self.git.run(
            repo.paths().root(),
            &[
                "log",
                "--format=%H",
                "-n",
                &limit,
                "--before",
                &before,
                "--",
                &data_rel,
            ],
        );
        if !log.success {
            return Vec::new();
        }
        log.output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn find_pre_compaction_content(
        &self,
        repo: &Repository,
        atom_id: &str,
        compacted_at: DateTime<Utc>,
    ) -> Option<HistoricalContent> {
        let data_rel = repo.paths().data_file_repo_relative();
        let root: PathBuf = repo.paths().root().to_path_buf();

        for commit in self.find_commits_before(repo, compacted_at) {
            let spec = format!("{commit}:{data_rel}");
            let show = self.git.run(&root, &["show", &spec]);
            if !show.success {
                continue;
            }

            let mut atom_record: Option<Atom> = None;
            let mut comments: BTreeMap<String, Comment> = BTreeMap::new();
            for line in show.output.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match Record::from_json_line(line) {
                    Ok(Record::Atom(atom)) if atom.id == atom_id => {
                        atom_record = Some(atom);
                    }
                    Ok(Record::Comment(comment)) if comment.parent_id == atom_id => {
                        comments.insert(comment.id.clone(), comment);
                    }
                    _ => {}
                }
            }

            match atom_record {
                // A snapshot where the atom is itself compacted is useless.
                Some(atom) if !atom.is_compacted() => {
                    let mut comments: Vec<Comment> = comments.into_values().collect();
                    comments.sort_by_key(|comment| comment.index().unwrap_or(u32::MAX));
                    return Some(HistoricalContent {
                        commit,
                        atom,
                        comments,
                    });
                }
                _ => continue,
            }
        }
        None
    }

    fn write_repo(&self) -> std::sync::RwLockWriteGuard<'_, Repository> {
        self.repo
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
