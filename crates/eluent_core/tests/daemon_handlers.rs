//! Claim/ledger handler dispatch and wire error codes.

use eluent_core::daemon::handlers::DaemonHandlers;
use eluent_core::daemon::protocol::{
    ClaimRequest, HandlerResponse, LedgerSyncRequest, ERR_CLAIM_CONFLICT, ERR_CLAIM_FAILED,
    ERR_INVALID_REQUEST, ERR_INVALID_STATE, ERR_LEDGER_NOT_CONFIGURED, ERR_LEDGER_NOT_SETUP,
};
use eluent_core::git::GitAdapter;
use eluent_core::ledger::state::SyncState;
use eluent_core::model::atom::AtomStatus;
use eluent_core::paths::GlobalPaths;
use eluent_core::repo::cache::RepositoryCache;
use eluent_core::repo::data_file::Repository;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SYNC_CONFIG: &str = "repo_name: proj\nsync:\n  ledger_branch: eluent-ledger\n";

struct Harness {
    root: tempfile::TempDir,
    cache: Arc<RepositoryCache>,
    handlers: DaemonHandlers,
}

impl Harness {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let cache = Arc::new(
            RepositoryCache::new(GlobalPaths::with_base(root.path().join("global"))).unwrap(),
        );
        let handlers = DaemonHandlers::new(Arc::clone(&cache), GitAdapter::new());
        Self {
            root,
            cache,
            handlers,
        }
    }

    fn make_repo(&self, name: &str, config: &str) -> (PathBuf, String) {
        let repo_root = self.root.path().join(name);
        std::fs::create_dir_all(repo_root.join(".eluent")).unwrap();
        std::fs::write(repo_root.join(".eluent/config.yaml"), config).unwrap();
        let mut repo = Repository::init(&repo_root).unwrap();
        let atom = repo.create_atom("claimable item").unwrap();
        (repo_root, atom.id)
    }

    fn claim(&self, repo_path: &Path, atom_id: &str, agent: &str) -> HandlerResponse {
        self.handlers.claim(&ClaimRequest {
            repo_path: repo_path.to_path_buf(),
            atom_id: atom_id.to_string(),
            agent_id: Some(agent.to_string()),
            offline: false,
            force: false,
        })
    }

    fn sync_action(&self, repo_path: &Path, action: &str) -> HandlerResponse {
        self.handlers.ledger_sync(&LedgerSyncRequest {
            repo_path: repo_path.to_path_buf(),
            action: action.to_string(),
        })
    }
}

fn data_of(response: &HandlerResponse) -> serde_json::Value {
    match response {
        HandlerResponse::Ok { data } => data.clone(),
        HandlerResponse::Err { error, .. } => {
            panic!("expected ok response, got {}: {}", error.code, error.message)
        }
    }
}

#[test]
fn local_claim_succeeds_without_sync_configured() {
    let harness = Harness::new();
    let (repo_path, atom_id) = harness.make_repo("plain", "repo_name: proj\n");

    let response = harness.claim(&repo_path, &atom_id, "agent-x");
    let data = data_of(&response);
    assert_eq!(data["claimed_by"], "agent-x");
    assert_eq!(data["offline"], false);
    assert_eq!(data["retries"], 0);

    // The repo itself reflects the exclusive claim.
    let cache = RepositoryCache::new(GlobalPaths::with_base(
        harness.root.path().join("verify_global"),
    ))
    .unwrap();
    let repo = cache.get(&repo_path).unwrap();
    let atom = repo.read().unwrap().find_atom(&atom_id).unwrap();
    assert_eq!(atom.status, AtomStatus::InProgress);
    assert_eq!(atom.assignee.as_deref(), Some("agent-x"));
}

#[test]
fn second_local_claim_conflicts_unless_forced() {
    let harness = Harness::new();
    let (repo_path, atom_id) = harness.make_repo("plain", "repo_name: proj\n");

    assert!(harness.claim(&repo_path, &atom_id, "agent-x").is_ok());

    let conflict = harness.claim(&repo_path, &atom_id, "agent-y");
    assert_eq!(conflict.error_code(), Some(ERR_CLAIM_CONFLICT));
    match &conflict {
        HandlerResponse::Err { data: Some(data), .. } => {
            assert_eq!(data["claimed_by"], "agent-x");
        }
        other => panic!("conflict should carry winner data, got {other:?}"),
    }

    let forced = harness.handlers.claim(&ClaimRequest {
        repo_path: repo_path.clone(),
        atom_id: atom_id.clone(),
        agent_id: Some("agent-y".to_string()),
        offline: false,
        force: true,
    });
    assert_eq!(data_of(&forced)["claimed_by"], "agent-y");
}

#[test]
fn claim_validates_state_and_input() {
    let harness = Harness::new();
    let (repo_path, atom_id) = harness.make_repo("plain", "repo_name: proj\n");

    let malformed = harness.claim(&repo_path, "not an id", "agent-x");
    assert_eq!(malformed.error_code(), Some(ERR_INVALID_REQUEST));

    let missing = harness.claim(
        &repo_path,
        "proj-01JBZTMQ1RABCDEFGHKMNZZZZZ",
        "agent-x",
    );
    assert_eq!(missing.error_code(), Some(ERR_CLAIM_FAILED));

    let unknown_repo = harness.claim(
        &harness.root.path().join("nope"),
        &atom_id,
        "agent-x",
    );
    assert_eq!(unknown_repo.error_code(), Some(ERR_INVALID_REQUEST));

    // Close the atom through the shared cache, then claiming becomes a
    // state error.
    {
        let repo = harness.cache.get(&repo_path).unwrap();
        let mut guard = repo.write().unwrap();
        let mut atom = guard.find_atom(&atom_id).unwrap();
        atom.status = AtomStatus::Closed;
        guard.update_atom(atom).unwrap();
    }
    let closed = harness.claim(&repo_path, &atom_id, "agent-x");
    assert_eq!(closed.error_code(), Some(ERR_INVALID_STATE));
}

#[test]
fn claim_with_unavailable_syncer_queues_offline_entry() {
    let harness = Harness::new();
    let (repo_path, atom_id) = harness.make_repo("synced", SYNC_CONFIG);

    // Sync is configured but never set up, so the worktree is absent.
    let response = harness.claim(&repo_path, &atom_id, "agent-x");
    let data = data_of(&response);
    assert_eq!(data["offline"], true);
    assert_eq!(data["retries"], 0);

    let state = SyncState::load(
        GlobalPaths::with_base(harness.root.path().join("global")).sync_state_file("proj"),
        GlobalPaths::with_base(harness.root.path().join("global")).sync_worktree_dir("proj"),
        "eluent-ledger",
    )
    .unwrap();
    let claims = state.offline_claims();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].atom_id, atom_id);
    assert_eq!(claims[0].agent_id, "agent-x");
}

#[test]
fn ledger_sync_maps_configuration_and_setup_errors() {
    let harness = Harness::new();
    let (plain_path, _) = harness.make_repo("plain", "repo_name: proj\n");
    let (synced_path, _) = harness.make_repo("synced", SYNC_CONFIG);

    let not_configured = harness.sync_action(&plain_path, "pull");
    assert_eq!(
        not_configured.error_code(),
        Some(ERR_LEDGER_NOT_CONFIGURED)
    );

    let unknown = harness.sync_action(&plain_path, "frobnicate");
    assert_eq!(unknown.error_code(), Some(ERR_INVALID_REQUEST));

    for action in ["pull", "push", "reconcile"] {
        let response = harness.sync_action(&synced_path, action);
        assert_eq!(
            response.error_code(),
            Some(ERR_LEDGER_NOT_SETUP),
            "action `{action}` should require setup"
        );
    }

    let status = harness.sync_action(&synced_path, "status");
    let data = data_of(&status);
    assert_eq!(data["setup"], false);
    assert_eq!(data["ledger_branch"], "eluent-ledger");
    assert_eq!(data["offline_claims"], 0);
}

#[test]
fn full_ledger_lifecycle_through_the_handlers() {
    let harness = Harness::new();
    let (repo_path, atom_id) = harness.make_repo("synced", SYNC_CONFIG);

    // Make the repo a real git repo with a bare origin.
    let git = GitAdapter::new();
    let remote = harness.root.path().join("origin.git");
    assert!(git.run(harness.root.path(), &["init", "--bare", "origin.git"]).success);
    assert!(git.run(&repo_path, &["init", "-b", "main"]).success);
    assert!(git.run(&repo_path, &["config", "user.name", "test"]).success);
    assert!(git
        .run(&repo_path, &["config", "user.email", "test@localhost"])
        .success);
    assert!(git.run(&repo_path, &["add", "-A"]).success);
    assert!(git.run(&repo_path, &["commit", "-m", "seed"]).success);
    assert!(git
        .run(&repo_path, &["remote", "add", "origin", remote.to_str().unwrap()])
        .success);
    assert!(git.run(&repo_path, &["push", "-u", "origin", "main"]).success);

    let setup = harness.sync_action(&repo_path, "setup");
    let setup_data = data_of(&setup);
    assert_eq!(setup_data["created_worktree"], true);

    let claim = harness.claim(&repo_path, &atom_id, "agent-x");
    let claim_data = data_of(&claim);
    assert_eq!(claim_data["offline"], false);
    assert_eq!(claim_data["claimed_by"], "agent-x");

    let pull = harness.sync_action(&repo_path, "pull");
    assert!(pull.is_ok());

    let status = harness.sync_action(&repo_path, "status");
    let status_data = data_of(&status);
    assert_eq!(status_data["setup"], true);
    assert_eq!(status_data["valid"], true);

    let resync = harness.sync_action(&repo_path, "force_resync");
    assert!(resync.is_ok(), "{resync:?}");

    let teardown = harness.sync_action(&repo_path, "teardown");
    assert!(teardown.is_ok());
}
