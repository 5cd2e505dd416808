//! Ledger sync engine.
//!
//! # Responsibility
//! - Maintain the dedicated ledger worktree and its branch.
//! - Pull/push ledger records and run the distributed claim protocol.
//!
//! # Invariants
//! - The pull -> commit -> push sequence of `claim_and_push` runs under the
//!   per-repo write lock, so claims on one repo never race in-process.
//! - Across hosts, ordering comes from the remote: a non-fast-forward
//!   rejection is the conflict signal, answered by rebase-and-retry.
//! - An expired claim is treated as forfeit only while checking the ledger
//!   during `claim_and_push`, never during status queries.

use crate::config::SyncConfig;
use crate::git::{GitAdapter, GitResult};
use crate::ledger::state::{StateError, SyncState};
use crate::model::atom::{Atom, AtomStatus};
use crate::model::record::Record;
use crate::paths::{GlobalPaths, RepoPaths};
use crate::repo::cache::SharedRepository;
use crate::repo::data_file::{RepoError, Repository};
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

pub type SyncResult<T> = Result<T, SyncError>;

/// Syncer construction error.
#[derive(Debug)]
pub enum SyncError {
    /// Repo config has no `sync.ledger_branch`.
    NotConfigured,
    State(StateError),
    Repo(RepoError),
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConfigured => write!(f, "ledger sync is not configured for this repo"),
            Self::State(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::State(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::NotConfigured => None,
        }
    }
}

impl From<StateError> for SyncError {
    fn from(value: StateError) -> Self {
        Self::State(value)
    }
}

impl From<RepoError> for SyncError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Outcome of `setup`.
#[derive(Debug, Clone, Default)]
pub struct SetupResult {
    pub success: bool,
    pub error: Option<String>,
    pub created_branch: bool,
    pub created_worktree: bool,
}

/// Outcome of `teardown`.
#[derive(Debug, Clone, Default)]
pub struct TeardownResult {
    pub success: bool,
    pub error: Option<String>,
}

/// Outcome of `pull_ledger` / `sync_to_main`.
#[derive(Debug, Clone, Default)]
pub struct PullResult {
    pub success: bool,
    pub error: Option<String>,
    pub changes_applied: usize,
}

impl PullResult {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            changes_applied: 0,
        }
    }
}

/// Outcome of `push_ledger`.
#[derive(Debug, Clone, Default)]
pub struct PushResult {
    pub success: bool,
    pub error: Option<String>,
    pub changes_applied: usize,
    pub retries: u32,
}

/// Outcome of `claim_and_push` and the handlers' local claim path.
#[derive(Debug, Clone, Default)]
pub struct ClaimResult {
    pub success: bool,
    pub error: Option<String>,
    /// Agent holding the claim after this call (winner on conflict).
    pub claimed_by: Option<String>,
    /// The claim was only applied locally and queued for reconciliation.
    pub offline: bool,
    pub conflict: bool,
    pub retries: u32,
}

impl ClaimResult {
    fn failure(error: impl Into<String>, retries: u32) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            retries,
            ..Self::default()
        }
    }
}

/// One reconciled offline claim.
#[derive(Debug, Clone)]
pub struct ReconcileEntry {
    pub atom_id: String,
    pub agent_id: String,
    pub success: bool,
    pub conflict: bool,
    pub error: Option<String>,
}

/// Point-in-time sync report for status queries.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub ledger_branch: String,
    pub remote: String,
    pub setup: bool,
    pub valid: bool,
    pub online: bool,
    pub ledger_head: Option<String>,
    pub last_pull_at: Option<DateTime<Utc>>,
    pub last_push_at: Option<DateTime<Utc>>,
    pub offline_claim_count: usize,
}

struct ClaimHolder {
    agent_id: String,
    claimed_at: DateTime<Utc>,
}

/// Coordinates one repo's ledger branch, worktree, and claim protocol.
pub struct LedgerSyncer {
    repo: SharedRepository,
    repo_root: PathBuf,
    repo_name: String,
    config: SyncConfig,
    git: GitAdapter,
    state: SyncState,
}

impl LedgerSyncer {
    /// Builds a syncer for a cached repository.
    ///
    /// # Errors
    /// - [`SyncError::NotConfigured`] when the repo has no sync block.
    pub fn for_repo(
        repo: SharedRepository,
        global: &GlobalPaths,
        git: GitAdapter,
    ) -> SyncResult<Self> {
        let (repo_root, repo_name, config) = {
            let guard = repo.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            let config = guard.config().sync.clone().ok_or(SyncError::NotConfigured)?;
            (
                guard.paths().root().to_path_buf(),
                guard.repo_name().to_string(),
                config,
            )
        };

        let state = SyncState::load(
            global.sync_state_file(&repo_name),
            global.sync_worktree_dir(&repo_name),
            config.ledger_branch.clone(),
        )?;

        Ok(Self {
            repo,
            repo_root,
            repo_name,
            config,
            git,
            state,
        })
    }

    pub fn repo_name(&self) -> &str {
        &self.repo_name
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Worktree directory exists; the syncer can operate.
    pub fn available(&self) -> bool {
        self.state.worktree_dir().is_dir()
    }

    /// Ledger HEAD is resolvable inside the worktree.
    pub fn healthy(&self) -> bool {
        self.available()
            && self
                .git
                .run(self.state.worktree_dir(), &["rev-parse", "HEAD"])
                .success
    }

    /// Remote is reachable.
    pub fn online(&self) -> bool {
        self.git
            .run(&self.repo_root, &["ls-remote", &self.config.remote])
            .success
    }

    /// Creates the ledger branch (from remote when present, else local) and
    /// the dedicated worktree, then marks state valid.
    pub fn setup(&self) -> SetupResult {
        let branch = self.config.ledger_branch.clone();
        let remote = self.config.remote.clone();

        // Best effort: a missing remote must not block local-only setup.
        let fetch = self
            .git
            .run(&self.repo_root, &["fetch", &remote, &branch]);
        if !fetch.success {
            info!(
                "event=ledger_setup module=ledger status=fetch_skipped repo={} error={}",
                self.repo_name, fetch.error
            );
        }

        let mut created_branch = false;
        if !self.branch_exists_local(&branch) {
            let remote_ref = format!("refs/remotes/{remote}/{branch}");
            let from_remote = self
                .git
                .run(&self.repo_root, &["rev-parse", "--verify", &remote_ref])
                .success;
            let create = if from_remote {
                let start = format!("{remote}/{branch}");
                self.git
                    .run(&self.repo_root, &["branch", &branch, &start])
            } else {
                self.git.run(&self.repo_root, &["branch", &branch])
            };
            if !create.success {
                return SetupResult {
                    success: false,
                    error: Some(format!("failed to create ledger branch: {}", create.error)),
                    ..SetupResult::default()
                };
            }
            created_branch = true;
        }

        let mut created_worktree = false;
        if !self.state.valid(&self.git) {
            let worktree_dir = self.state.worktree_dir().to_path_buf();
            if worktree_dir.exists() {
                // Stale checkout from an earlier teardown failure.
                let worktree_str = worktree_dir.to_string_lossy().to_string();
                let _ = self.git.run(
                    &self.repo_root,
                    &["worktree", "remove", "--force", &worktree_str],
                );
                let _ = std::fs::remove_dir_all(&worktree_dir);
                let _ = self.git.run(&self.repo_root, &["worktree", "prune"]);
            }
            if let Some(parent) = worktree_dir.parent() {
                if let Err(err) = std::fs::create_dir_all(parent) {
                    return SetupResult {
                        success: false,
                        error: Some(format!("failed to create worktree parent: {err}")),
                        created_branch,
                        created_worktree: false,
                    };
                }
            }
            let worktree_str = worktree_dir.to_string_lossy().to_string();
            let add = self.git.run(
                &self.repo_root,
                &["worktree", "add", &worktree_str, &branch],
            );
            if !add.success {
                return SetupResult {
                    success: false,
                    error: Some(format!("failed to create worktree: {}", add.error)),
                    created_branch,
                    created_worktree: false,
                };
            }
            created_worktree = true;
        }

        let head = self.rev_parse_head();
        if let Err(err) = self.state.set_head(head) {
            warn!(
                "event=ledger_setup module=ledger status=state_save_failed repo={} error={}",
                self.repo_name, err
            );
        }

        info!(
            "event=ledger_setup module=ledger status=ok repo={} created_branch={created_branch} created_worktree={created_worktree}",
            self.repo_name
        );
        SetupResult {
            success: true,
            error: None,
            created_branch,
            created_worktree,
        }
    }

    /// Removes the worktree and clears state pointers. The ledger branch
    /// itself is preserved. Idempotent.
    pub fn teardown(&self) -> TeardownResult {
        let worktree_dir = self.state.worktree_dir().to_path_buf();
        if worktree_dir.exists() {
            let worktree_str = worktree_dir.to_string_lossy().to_string();
            let remove = self.git.run(
                &self.repo_root,
                &["worktree", "remove", "--force", &worktree_str],
            );
            if !remove.success {
                if let Err(err) = std::fs::remove_dir_all(&worktree_dir) {
                    return TeardownResult {
                        success: false,
                        error: Some(format!("failed to remove worktree: {err}")),
                    };
                }
                let _ = self.git.run(&self.repo_root, &["worktree", "prune"]);
            }
        }

        if let Err(err) = self.state.clear_pointers() {
            return TeardownResult {
                success: false,
                error: Some(err.to_string()),
            };
        }

        info!(
            "event=ledger_teardown module=ledger status=ok repo={}",
            self.repo_name
        );
        TeardownResult {
            success: true,
            error: None,
        }
    }

    /// Fetches the remote ledger, fast-forwards the worktree, and replays
    /// new records into the main data file.
    pub fn pull_ledger(&self) -> PullResult {
        let mut repo = self.write_repo();
        self.pull_inner(&mut repo)
    }

    fn pull_inner(&self, repo: &mut Repository) -> PullResult {
        if !self.available() {
            return PullResult::failure("ledger worktree is not set up");
        }

        let worktree = self.state.worktree_dir().to_path_buf();
        let fetch = self.git.run(
            &worktree,
            &["fetch", &self.config.remote, &self.config.ledger_branch],
        );
        if fetch.success {
            let ff = self.git.run(&worktree, &["merge", "--ff-only", "FETCH_HEAD"]);
            if !ff.success {
                return PullResult::failure(format!("fast-forward failed: {}", ff.error));
            }
        } else if !missing_remote_ref(&fetch) {
            return PullResult::failure(format!("fetch failed: {}", fetch.error));
        }

        let records = self.read_ledger_records();
        let changes_applied = match repo.apply_records(records) {
            Ok(count) => count,
            Err(err) => return PullResult::failure(format!("replay failed: {err}")),
        };

        if let Err(err) = self.state.mark_pull(self.rev_parse_head(), Utc::now()) {
            warn!(
                "event=ledger_pull module=ledger status=state_save_failed repo={} error={}",
                self.repo_name, err
            );
        }

        info!(
            "event=ledger_pull module=ledger status=ok repo={} changes={changes_applied}",
            self.repo_name
        );
        PullResult {
            success: true,
            error: None,
            changes_applied,
        }
    }

    /// Pushes worktree commits, rebasing and retrying on non-fast-forward
    /// rejection up to the configured retry budget.
    pub fn push_ledger(&self) -> PushResult {
        if !self.available() {
            return PushResult {
                success: false,
                error: Some("ledger worktree is not set up".to_string()),
                ..PushResult::default()
            };
        }

        let worktree = self.state.worktree_dir().to_path_buf();
        let pending = self.pending_commit_count();
        let mut retries = 0;
        loop {
            let push = self.git.run(
                &worktree,
                &["push", &self.config.remote, &self.config.ledger_branch],
            );
            if push.success {
                if let Err(err) = self.state.mark_push(self.rev_parse_head(), Utc::now()) {
                    warn!(
                        "event=ledger_push module=ledger status=state_save_failed repo={} error={}",
                        self.repo_name, err
                    );
                }
                info!(
                    "event=ledger_push module=ledger status=ok repo={} commits={pending} retries={retries}",
                    self.repo_name
                );
                return PushResult {
                    success: true,
                    error: None,
                    changes_applied: pending,
                    retries,
                };
            }

            if non_fast_forward(&push) && retries < self.config.claim_retries {
                let rebase = self.git.run(
                    &worktree,
                    &[
                        "pull",
                        "--rebase",
                        &self.config.remote,
                        &self.config.ledger_branch,
                    ],
                );
                if !rebase.success {
                    return PushResult {
                        success: false,
                        error: Some(format!("rebase failed: {}", rebase.error)),
                        changes_applied: 0,
                        retries,
                    };
                }
                retries += 1;
                continue;
            }

            return PushResult {
                success: false,
                error: Some(push.error),
                changes_applied: 0,
                retries,
            };
        }
    }

    /// Merges accepted ledger records back into the main data file.
    /// Idempotent: unchanged records are skipped.
    pub fn sync_to_main(&self) -> PullResult {
        if !self.available() {
            return PullResult::failure("ledger worktree is not set up");
        }
        let mut repo = self.write_repo();
        let records = self.read_ledger_records();
        match repo.apply_records(records) {
            Ok(changes_applied) => PullResult {
                success: true,
                error: None,
                changes_applied,
            },
            Err(err) => PullResult::failure(format!("merge to main failed: {err}")),
        }
    }

    /// The distributed claim protocol: pull, check, commit, push, retry.
    ///
    /// Holds the per-repo write lock for the whole sequence. The first
    /// commit accepted by the remote wins; losers observe the winner on
    /// their next pull and report a conflict.
    pub fn claim_and_push(&self, atom_id: &str, agent_id: &str) -> ClaimResult {
        let mut repo = self.write_repo();
        self.claim_inner(&mut repo, atom_id, agent_id)
    }

    fn claim_inner(
        &self,
        repo: &mut Repository,
        atom_id: &str,
        agent_id: &str,
    ) -> ClaimResult {
        if repo.find_atom(atom_id).is_none() {
            return ClaimResult::failure(format!("atom not found: {atom_id}"), 0);
        }

        let max_retries = self.config.claim_retries;
        for attempt in 0..max_retries {
            let pull = self.pull_inner(repo);
            if !pull.success {
                return ClaimResult::failure(
                    pull.error
                        .unwrap_or_else(|| "ledger pull failed".to_string()),
                    attempt,
                );
            }

            if let Some(holder) = self.ledger_claim_holder(atom_id) {
                if holder.agent_id != agent_id && !self.claim_expired(&holder) {
                    info!(
                        "event=claim module=ledger status=conflict atom_id={atom_id} agent_id={agent_id} claimed_by={}",
                        holder.agent_id
                    );
                    return ClaimResult {
                        success: false,
                        error: Some(format!("Already claimed by {}", holder.agent_id)),
                        claimed_by: Some(holder.agent_id),
                        offline: false,
                        conflict: true,
                        retries: attempt,
                    };
                }
            }

            let Some(mut atom) = repo.find_atom(atom_id) else {
                return ClaimResult::failure(format!("atom not found: {atom_id}"), attempt);
            };
            atom.status = AtomStatus::InProgress;
            atom.assignee = Some(agent_id.to_string());
            atom.touch();

            if let Err(err) = self.append_claim_to_worktree(&atom) {
                return ClaimResult::failure(format!("failed to write claim: {err}"), attempt);
            }
            let commit = self.commit_worktree(&format!("claim {atom_id} by {agent_id}"));
            if !commit.success {
                return ClaimResult::failure(
                    format!("failed to commit claim: {}", commit.error),
                    attempt,
                );
            }

            let push = self.git.run(
                self.state.worktree_dir(),
                &["push", &self.config.remote, &self.config.ledger_branch],
            );
            if push.success {
                if let Err(err) = repo.apply_remote_atom(atom) {
                    return ClaimResult::failure(
                        format!("claim pushed but local apply failed: {err}"),
                        attempt,
                    );
                }
                if let Err(err) = self.state.mark_push(self.rev_parse_head(), Utc::now()) {
                    warn!(
                        "event=claim module=ledger status=state_save_failed repo={} error={}",
                        self.repo_name, err
                    );
                }
                info!(
                    "event=claim module=ledger status=ok atom_id={atom_id} agent_id={agent_id} retries={attempt}"
                );
                return ClaimResult {
                    success: true,
                    error: None,
                    claimed_by: Some(agent_id.to_string()),
                    offline: false,
                    conflict: false,
                    retries: attempt,
                };
            }

            if non_fast_forward(&push) {
                // Drop our claim commit and re-enter the loop on fresh state.
                let _ = self
                    .git
                    .run(self.state.worktree_dir(), &["reset", "--hard", "HEAD~1"]);
                continue;
            }

            return ClaimResult::failure(format!("push failed: {}", push.error), attempt);
        }

        ClaimResult::failure(
            format!("Max retries ({max_retries}) exhausted"),
            max_retries,
        )
    }

    /// Replays queued offline claims against the current ledger.
    ///
    /// Successful and conflicted entries are both dequeued; other failures
    /// stay queued for the next reconciliation.
    pub fn reconcile_offline_claims(&self) -> Vec<ReconcileEntry> {
        let mut results = Vec::new();
        for claim in self.state.offline_claims() {
            let outcome = self.claim_and_push(&claim.atom_id, &claim.agent_id);
            let entry = ReconcileEntry {
                atom_id: claim.atom_id.clone(),
                agent_id: claim.agent_id.clone(),
                success: outcome.success,
                conflict: outcome.conflict,
                error: outcome.error,
            };
            if outcome.success || outcome.conflict {
                if let Err(err) =
                    self.state.remove_offline_claim(&claim.atom_id, &claim.agent_id)
                {
                    warn!(
                        "event=reconcile module=ledger status=dequeue_failed atom_id={} error={}",
                        claim.atom_id, err
                    );
                }
            }
            info!(
                "event=reconcile module=ledger status={} atom_id={} agent_id={}",
                if entry.success {
                    "ok"
                } else if entry.conflict {
                    "conflict"
                } else {
                    "deferred"
                },
                entry.atom_id,
                entry.agent_id
            );
            results.push(entry);
        }
        results
    }

    /// Full report for status queries. Never mutates anything.
    pub fn status(&self) -> SyncStatus {
        let snapshot = self.state.snapshot();
        SyncStatus {
            ledger_branch: self.config.ledger_branch.clone(),
            remote: self.config.remote.clone(),
            setup: self.available(),
            valid: self.state.valid(&self.git),
            online: self.online(),
            ledger_head: snapshot.ledger_head,
            last_pull_at: snapshot.last_pull_at,
            last_push_at: snapshot.last_push_at,
            offline_claim_count: snapshot.offline_claims.len(),
        }
    }

    fn write_repo(&self) -> std::sync::RwLockWriteGuard<'_, Repository> {
        self.repo
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn branch_exists_local(&self, branch: &str) -> bool {
        let reference = format!("refs/heads/{branch}");
        self.git
            .run(&self.repo_root, &["rev-parse", "--verify", &reference])
            .success
    }

    fn rev_parse_head(&self) -> Option<String> {
        let result = self
            .git
            .run(self.state.worktree_dir(), &["rev-parse", "HEAD"]);
        result.success.then_some(result.output)
    }

    fn pending_commit_count(&self) -> usize {
        let range = format!(
            "{}/{}..HEAD",
            self.config.remote, self.config.ledger_branch
        );
        let result = self.git.run(
            self.state.worktree_dir(),
            &["rev-list", "--count", &range],
        );
        if result.success {
            result.output.trim().parse().unwrap_or(0)
        } else {
            0
        }
    }

    fn ledger_data_file(&self) -> PathBuf {
        RepoPaths::new(self.state.worktree_dir()).data_file()
    }

    /// Records currently on the ledger branch, malformed lines skipped.
    fn read_ledger_records(&self) -> Vec<Record> {
        let mut records = Vec::new();
        let file = match std::fs::File::open(self.ledger_data_file()) {
            Ok(file) => file,
            Err(_) => return records,
        };
        for line in BufReader::new(file).lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match Record::from_json_line(&line) {
                Ok(record) => records.push(record),
                Err(err) => warn!(
                    "event=ledger_read module=ledger status=skipped_line repo={} error={}",
                    self.repo_name, err
                ),
            }
        }
        records
    }

    /// Last atom record on the ledger for `atom_id`, when it is a live
    /// claim (in_progress with an assignee).
    fn ledger_claim_holder(&self, atom_id: &str) -> Option<ClaimHolder> {
        let mut holder = None;
        for record in self.read_ledger_records() {
            if let Record::Atom(atom) = record {
                if atom.id == atom_id {
                    holder = match (&atom.status, &atom.assignee) {
                        (AtomStatus::InProgress, Some(agent_id)) => Some(ClaimHolder {
                            agent_id: agent_id.clone(),
                            claimed_at: atom.updated_at,
                        }),
                        _ => None,
                    };
                }
            }
        }
        holder
    }

    fn claim_expired(&self, holder: &ClaimHolder) -> bool {
        match self.config.claim_timeout_hours {
            Some(hours) => {
                holder.claimed_at + Duration::hours(i64::from(hours)) < Utc::now()
            }
            None => false,
        }
    }

    fn append_claim_to_worktree(&self, atom: &Atom) -> SyncResult<()> {
        let data_file = self.ledger_data_file();
        if let Some(parent) = data_file.parent() {
            std::fs::create_dir_all(parent).map_err(RepoError::Io)?;
        }
        let line = Record::Atom(atom.clone())
            .to_json_line()
            .map_err(RepoError::Record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&data_file)
            .map_err(RepoError::Io)?;
        writeln!(file, "{line}").map_err(RepoError::Io)?;
        file.flush().map_err(RepoError::Io)?;
        Ok(())
    }

    fn commit_worktree(&self, message: &str) -> GitResult {
        let worktree = self.state.worktree_dir().to_path_buf();
        let data_rel = RepoPaths::new(&worktree).data_file_repo_relative();
        let add = self.git.run(&worktree, &["add", &data_rel]);
        if !add.success {
            return add;
        }
        self.git.run(
            &worktree,
            &[
                "-c",
                "user.name=eluent",
                "-c",
                "user.email=eluent@localhost",
                "commit",
                "-m",
                message,
            ],
        )
    }
}

/// Push rejection that signals someone else landed first.
fn non_fast_forward(result: &GitResult) -> bool {
    let error = result.error.as_str();
    error.contains("non-fast-forward")
        || error.contains("fetch first")
        || error.contains("[rejected]")
}

/// Fetch failure that just means the remote branch does not exist yet.
fn missing_remote_ref(result: &GitResult) -> bool {
    result.error.contains("couldn't find remote ref")
}
