//! Daemon claim and ledger-sync command handlers.
//!
//! # Responsibility
//! - Validate requests, pick the ledger or local claim path, and map every
//!   outcome to a wire error code.
//!
//! # Invariants
//! - Claims never target `closed`/`discard`/`blocked` atoms.
//! - Offline claims are queued only when sync is configured but
//!   unavailable (or explicitly requested) at claim time.
//! - One syncer is shared per repo path, built check-then-insert under the
//!   handler mutex.

use crate::daemon::protocol::{
    ClaimRequest, HandlerResponse, LedgerSyncRequest, ERR_CLAIM_CONFLICT, ERR_CLAIM_FAILED,
    ERR_INVALID_REQUEST, ERR_INVALID_STATE, ERR_LEDGER_NOT_CONFIGURED, ERR_LEDGER_NOT_SETUP,
    ERR_MAX_RETRIES, ERR_PULL_FAILED, ERR_PUSH_FAILED, ERR_RESYNC_FAILED, ERR_SETUP_FAILED,
};
use crate::git::GitAdapter;
use crate::id::ulid::valid_atom_id;
use crate::ledger::syncer::{LedgerSyncer, SyncError};
use crate::model::atom::AtomStatus;
use crate::repo::cache::{RepositoryCache, SharedRepository};
use chrono::Utc;
use log::info;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Claim/ledger command surface shared by all daemon client threads.
pub struct DaemonHandlers {
    cache: Arc<RepositoryCache>,
    git: GitAdapter,
    syncers: Mutex<HashMap<PathBuf, Arc<LedgerSyncer>>>,
}

impl DaemonHandlers {
    pub fn new(cache: Arc<RepositoryCache>, git: GitAdapter) -> Self {
        Self {
            cache,
            git,
            syncers: Mutex::new(HashMap::new()),
        }
    }

    /// Handles one `claim` request.
    pub fn claim(&self, request: &ClaimRequest) -> HandlerResponse {
        if !valid_atom_id(&request.atom_id) {
            return HandlerResponse::error(
                ERR_INVALID_REQUEST,
                format!("malformed atom id: `{}`", request.atom_id),
            );
        }

        let repo = match self.cache.get(&request.repo_path) {
            Ok(repo) => repo,
            Err(err) => {
                return HandlerResponse::error(ERR_INVALID_REQUEST, err.to_string());
            }
        };

        let agent_id = normalize_agent_id(request.agent_id.as_deref());
        let atom = {
            let guard = repo.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.find_atom(&request.atom_id)
        };
        let Some(atom) = atom else {
            return HandlerResponse::error(
                ERR_CLAIM_FAILED,
                format!("atom not found: {}", request.atom_id),
            );
        };
        if !atom.status.is_claimable() {
            return HandlerResponse::error(
                ERR_INVALID_STATE,
                format!("atom status `{}` cannot be claimed", atom.status),
            );
        }

        let syncer = match self.syncer_for(&request.repo_path, &repo) {
            Ok(syncer) => Some(syncer),
            Err(SyncError::NotConfigured) => None,
            Err(err) => {
                return HandlerResponse::error(ERR_CLAIM_FAILED, err.to_string());
            }
        };

        match &syncer {
            Some(syncer) if !request.offline && syncer.available() => {
                let result = syncer.claim_and_push(&request.atom_id, &agent_id);
                if result.success {
                    return HandlerResponse::ok(json!({
                        "atom_id": request.atom_id,
                        "claimed_by": agent_id,
                        "offline": false,
                        "retries": result.retries,
                    }));
                }
                if result.conflict {
                    if request.force {
                        // Forced takeover falls back to the local path; the
                        // overwrite reaches the ledger on the next push.
                        return self.claim_locally(&repo, syncer, request, &agent_id);
                    }
                    return HandlerResponse::error_with_data(
                        ERR_CLAIM_CONFLICT,
                        result
                            .error
                            .unwrap_or_else(|| "claim conflict".to_string()),
                        json!({ "claimed_by": result.claimed_by }),
                    );
                }
                let message = result
                    .error
                    .unwrap_or_else(|| "claim failed".to_string());
                if message.starts_with("Max retries") {
                    return HandlerResponse::error_with_data(
                        ERR_MAX_RETRIES,
                        message,
                        json!({ "retries": result.retries }),
                    );
                }
                HandlerResponse::error(ERR_CLAIM_FAILED, message)
            }
            Some(syncer) => self.claim_locally(&repo, syncer, request, &agent_id),
            None => self.claim_without_sync(&repo, request, &agent_id),
        }
    }

    /// Local claim with an offline-queue entry for later reconciliation.
    fn claim_locally(
        &self,
        repo: &SharedRepository,
        syncer: &LedgerSyncer,
        request: &ClaimRequest,
        agent_id: &str,
    ) -> HandlerResponse {
        let response = self.apply_local_claim(repo, request, agent_id);
        if response.is_ok() {
            if let Err(err) =
                syncer
                    .state()
                    .record_offline_claim(&request.atom_id, agent_id, Utc::now())
            {
                return HandlerResponse::error(ERR_CLAIM_FAILED, err.to_string());
            }
            info!(
                "event=claim module=daemon status=offline atom_id={} agent_id={agent_id}",
                request.atom_id
            );
        }
        response
    }

    /// Local claim on a repo with no sync configured; nothing is queued.
    fn claim_without_sync(
        &self,
        repo: &SharedRepository,
        request: &ClaimRequest,
        agent_id: &str,
    ) -> HandlerResponse {
        self.apply_local_claim(repo, request, agent_id)
    }

    fn apply_local_claim(
        &self,
        repo: &SharedRepository,
        request: &ClaimRequest,
        agent_id: &str,
    ) -> HandlerResponse {
        let mut guard = repo
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(mut atom) = guard.find_atom(&request.atom_id) else {
            return HandlerResponse::error(
                ERR_CLAIM_FAILED,
                format!("atom not found: {}", request.atom_id),
            );
        };

        if let Some(holder) = &atom.assignee {
            if holder != agent_id && !request.force {
                return HandlerResponse::error_with_data(
                    ERR_CLAIM_CONFLICT,
                    format!("Already claimed by {holder}"),
                    json!({ "claimed_by": holder }),
                );
            }
        }

        atom.status = AtomStatus::InProgress;
        atom.assignee = Some(agent_id.to_string());
        if let Err(err) = guard.update_atom(atom) {
            return HandlerResponse::error(ERR_CLAIM_FAILED, err.to_string());
        }

        HandlerResponse::ok(json!({
            "atom_id": request.atom_id,
            "claimed_by": agent_id,
            "offline": request.offline || self.offline_for(&request.repo_path),
            "retries": 0,
        }))
    }

    fn offline_for(&self, repo_path: &Path) -> bool {
        let syncers = self
            .syncers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        syncers
            .get(&cache_key(repo_path))
            .map(|syncer| !syncer.available())
            .unwrap_or(false)
    }

    /// Handles one `ledger_sync` request.
    pub fn ledger_sync(&self, request: &LedgerSyncRequest) -> HandlerResponse {
        const ACTIONS: [&str; 7] = [
            "setup",
            "teardown",
            "pull",
            "push",
            "status",
            "reconcile",
            "force_resync",
        ];
        if !ACTIONS.contains(&request.action.as_str()) {
            return HandlerResponse::error(
                ERR_INVALID_REQUEST,
                format!("unknown ledger_sync action `{}`", request.action),
            );
        }

        let repo = match self.cache.get(&request.repo_path) {
            Ok(repo) => repo,
            Err(err) => {
                return HandlerResponse::error(ERR_INVALID_REQUEST, err.to_string());
            }
        };
        let syncer = match self.syncer_for(&request.repo_path, &repo) {
            Ok(syncer) => syncer,
            Err(SyncError::NotConfigured) => {
                return HandlerResponse::error(
                    ERR_LEDGER_NOT_CONFIGURED,
                    "sync.ledger_branch is not set for this repo",
                );
            }
            Err(err) => {
                return HandlerResponse::error(ERR_SETUP_FAILED, err.to_string());
            }
        };

        match request.action.as_str() {
            "setup" => {
                let result = syncer.setup();
                if result.success {
                    HandlerResponse::ok(json!({
                        "created_branch": result.created_branch,
                        "created_worktree": result.created_worktree,
                    }))
                } else {
                    HandlerResponse::error(
                        ERR_SETUP_FAILED,
                        result.error.unwrap_or_else(|| "setup failed".to_string()),
                    )
                }
            }
            "teardown" => {
                let result = syncer.teardown();
                if result.success {
                    HandlerResponse::ok(json!({}))
                } else {
                    HandlerResponse::error(
                        ERR_SETUP_FAILED,
                        result
                            .error
                            .unwrap_or_else(|| "teardown failed".to_string()),
                    )
                }
            }
            "pull" => {
                if !syncer.available() {
                    return not_setup_response();
                }
                let result = syncer.pull_ledger();
                if result.success {
                    HandlerResponse::ok(json!({ "changes_applied": result.changes_applied }))
                } else {
                    HandlerResponse::error(
                        ERR_PULL_FAILED,
                        result.error.unwrap_or_else(|| "pull failed".to_string()),
                    )
                }
            }
            "push" => {
                if !syncer.available() {
                    return not_setup_response();
                }
                let result = syncer.push_ledger();
                if result.success {
                    HandlerResponse::ok(json!({
                        "changes_applied": result.changes_applied,
                        "retries": result.retries,
                    }))
                } else {
                    HandlerResponse::error(
                        ERR_PUSH_FAILED,
                        result.error.unwrap_or_else(|| "push failed".to_string()),
                    )
                }
            }
            "status" => {
                let status = syncer.status();
                HandlerResponse::ok(json!({
                    "ledger_branch": status.ledger_branch,
                    "remote": status.remote,
                    "setup": status.setup,
                    "valid": status.valid,
                    "online": status.online,
                    "ledger_head": status.ledger_head,
                    "last_pull_at": status.last_pull_at,
                    "last_push_at": status.last_push_at,
                    "offline_claims": status.offline_claim_count,
                }))
            }
            "reconcile" => {
                if !syncer.available() {
                    return not_setup_response();
                }
                let entries: Vec<_> = syncer
                    .reconcile_offline_claims()
                    .into_iter()
                    .map(|entry| {
                        json!({
                            "atom_id": entry.atom_id,
                            "agent_id": entry.agent_id,
                            "success": entry.success,
                            "conflict": entry.conflict,
                            "error": entry.error,
                        })
                    })
                    .collect();
                HandlerResponse::ok(json!({ "results": entries }))
            }
            // The allowlist above makes this the only remaining action.
            _ => self.force_resync(&syncer),
        }
    }

    /// teardown (when available) -> reset state -> setup -> pull ->
    /// sync_to_main, failing early with the stage-specific code.
    fn force_resync(&self, syncer: &LedgerSyncer) -> HandlerResponse {
        if syncer.available() {
            let teardown = syncer.teardown();
            if !teardown.success {
                return HandlerResponse::error(
                    ERR_RESYNC_FAILED,
                    teardown
                        .error
                        .unwrap_or_else(|| "teardown failed".to_string()),
                );
            }
        }
        if let Err(err) = syncer.state().reset() {
            return HandlerResponse::error(ERR_RESYNC_FAILED, err.to_string());
        }

        let setup = syncer.setup();
        if !setup.success {
            return HandlerResponse::error(
                ERR_SETUP_FAILED,
                setup.error.unwrap_or_else(|| "setup failed".to_string()),
            );
        }
        let pull = syncer.pull_ledger();
        if !pull.success {
            return HandlerResponse::error(
                ERR_PULL_FAILED,
                pull.error.unwrap_or_else(|| "pull failed".to_string()),
            );
        }
        let merge = syncer.sync_to_main();
        if !merge.success {
            return HandlerResponse::error(
                ERR_RESYNC_FAILED,
                merge.error.unwrap_or_else(|| "merge failed".to_string()),
            );
        }

        info!("event=force_resync module=daemon status=ok repo={}", syncer.repo_name());
        HandlerResponse::ok(json!({
            "created_branch": setup.created_branch,
            "created_worktree": setup.created_worktree,
            "changes_applied": pull.changes_applied + merge.changes_applied,
        }))
    }

    /// One syncer per repo path, check-then-insert under the mutex.
    fn syncer_for(
        &self,
        repo_path: &Path,
        repo: &SharedRepository,
    ) -> Result<Arc<LedgerSyncer>, SyncError> {
        let key = cache_key(repo_path);
        let mut syncers = self
            .syncers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = syncers.get(&key) {
            return Ok(Arc::clone(existing));
        }
        let global = self.cache.global_paths().clone();
        let syncer = Arc::new(LedgerSyncer::for_repo(
            Arc::clone(repo),
            &global,
            self.git.clone(),
        )?);
        syncers.insert(key, Arc::clone(&syncer));
        Ok(syncer)
    }
}

fn cache_key(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn not_setup_response() -> HandlerResponse {
    HandlerResponse::error(
        ERR_LEDGER_NOT_SETUP,
        "ledger worktree is not set up; run setup first",
    )
}

/// Trims the requested agent id, falling back to the host name, then to
/// `"unknown"`.
fn normalize_agent_id(requested: Option<&str>) -> String {
    if let Some(agent_id) = requested {
        let trimmed = agent_id.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    for variable in ["HOSTNAME", "COMPUTERNAME"] {
        if let Ok(host) = std::env::var(variable) {
            let trimmed = host.trim().to_string();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
    }
    "unknown".to_string()
}
