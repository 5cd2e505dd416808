//! Tiered compaction and git-history restoration, end to end.

use eluent_core::compact::compactor::Compactor;
use eluent_core::compact::restore::{RestoreError, Restorer};
use eluent_core::git::GitAdapter;
use eluent_core::model::atom::{
    AtomStatus, META_COMPACTION_TIER, META_ORIGINAL_COMMENT_COUNT, META_ORIGINAL_DESCRIPTION_LEN,
    META_RESTORED_AT, META_RESTORED_FROM_COMMIT,
};
use eluent_core::repo::cache::SharedRepository;
use eluent_core::repo::data_file::Repository;
use chrono::{Duration, Utc};
use std::path::Path;
use std::sync::{Arc, RwLock};

fn git(dir: &Path, args: &[&str]) {
    let result = GitAdapter::new().run(dir, args);
    assert!(
        result.success,
        "git {args:?} failed in {}: {}",
        dir.display(),
        result.error
    );
}

fn commit_data(dir: &Path, message: &str) {
    git(dir, &["add", ".eluent"]);
    git(dir, &["commit", "-m", message]);
}

/// Git-backed repo holding one closed atom with a 1200-char description
/// and five comments, committed to history.
fn seeded_repo() -> (tempfile::TempDir, SharedRepository, String) {
    let dir = tempfile::tempdir().unwrap();
    git(dir.path(), &["init", "-b", "main"]);
    git(dir.path(), &["config", "user.name", "test"]);
    git(dir.path(), &["config", "user.email", "test@localhost"]);
    std::fs::create_dir_all(dir.path().join(".eluent")).unwrap();
    std::fs::write(dir.path().join(".eluent/config.yaml"), "repo_name: proj\n").unwrap();

    let mut repo = Repository::init(dir.path()).unwrap();
    let atom = repo.create_atom("long-lived item").unwrap();

    let description: String = "All of this context matters for the audit trail. "
        .repeat(25)
        .chars()
        .take(1200)
        .collect();
    assert_eq!(description.chars().count(), 1200);

    let mut closed = atom.clone();
    closed.description = description;
    closed.status = AtomStatus::Closed;
    repo.update_atom(closed).unwrap();

    for index in 1..=5 {
        repo.create_comment(&atom.id, "alice", format!("progress note {index}"))
            .unwrap();
    }

    commit_data(dir.path(), "pre-compaction snapshot");
    (dir, Arc::new(RwLock::new(repo)), atom.id)
}

#[test]
fn tier1_compaction_summarizes_description_and_comments() {
    let (_dir, shared, atom_id) = seeded_repo();
    let compactor = Compactor::new(Arc::clone(&shared));

    let outcome = compactor.compact(&atom_id, 1);
    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.description_before, 1200);
    assert!(outcome.description_after <= 500);
    assert_eq!(outcome.comments_before, 5);
    assert_eq!(outcome.comments_after, 1);

    let guard = shared.read().unwrap();
    let atom = guard.find_atom(&atom_id).unwrap();
    assert_eq!(atom.compaction_tier(), 1);
    assert!(atom.description.chars().count() <= 500);
    assert_eq!(
        atom.metadata[META_ORIGINAL_DESCRIPTION_LEN],
        serde_json::json!(1200)
    );
    assert_eq!(
        atom.metadata[META_ORIGINAL_COMMENT_COUNT],
        serde_json::json!(5)
    );

    let comments = guard.comments_for(&atom_id);
    assert_eq!(comments.len(), 1);
    assert!(comments[0].content.contains("5 comments by 1 authors"));
}

#[test]
fn tier2_follows_tier1_and_keeps_original_sizes() {
    let (_dir, shared, atom_id) = seeded_repo();
    let compactor = Compactor::new(Arc::clone(&shared));

    assert!(compactor.compact(&atom_id, 1).success);
    // Tier may only advance.
    let repeat = compactor.compact(&atom_id, 1);
    assert!(!repeat.success);

    let outcome = compactor.compact(&atom_id, 2);
    assert!(outcome.success, "{:?}", outcome.error);

    let guard = shared.read().unwrap();
    let atom = guard.find_atom(&atom_id).unwrap();
    assert_eq!(atom.compaction_tier(), 2);
    assert!(atom.description.chars().count() <= 100);
    assert_eq!(
        atom.metadata[META_ORIGINAL_DESCRIPTION_LEN],
        serde_json::json!(1200)
    );
    assert!(guard.comments_for(&atom_id).is_empty());
}

#[test]
fn compact_all_respects_cutoff_and_preview() {
    let (_dir, shared, atom_id) = seeded_repo();
    let compactor = Compactor::new(Arc::clone(&shared));

    // updated_at is recent, so the default 30-day window excludes it.
    assert!(compactor.compact_all(1, None, false).is_empty());

    let future_cutoff = Some(Utc::now() + Duration::seconds(5));
    let previews = compactor.compact_all(1, future_cutoff, true);
    assert_eq!(previews.len(), 1);
    assert_eq!(previews[0].atom_id, atom_id);
    assert!(previews[0].description_after <= 500);

    // Preview must not have mutated anything.
    {
        let guard = shared.read().unwrap();
        assert_eq!(guard.find_atom(&atom_id).unwrap().compaction_tier(), 0);
    }

    let outcomes = compactor.compact_all(1, future_cutoff, false);
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].success);
}

#[test]
fn restore_recovers_pre_compaction_content() {
    let (dir, shared, atom_id) = seeded_repo();
    let compactor = Compactor::new(Arc::clone(&shared));
    assert!(compactor.compact(&atom_id, 1).success);
    // The compacted state is committed too; restore must skip it.
    commit_data(dir.path(), "post-compaction snapshot");

    let restorer = Restorer::new(Arc::clone(&shared), GitAdapter::new());
    assert!(restorer.can_restore(&atom_id));

    let report = restorer.restore(&atom_id).unwrap();
    assert_eq!(report.description_chars, 1200);
    assert_eq!(report.comments_restored, 5);
    assert!(!report.restored_from_commit.is_empty());

    let guard = shared.read().unwrap();
    let atom = guard.find_atom(&atom_id).unwrap();
    assert_eq!(atom.compaction_tier(), 0);
    assert_eq!(atom.description.chars().count(), 1200);
    assert!(atom.metadata.contains_key(META_RESTORED_AT));
    assert!(atom.metadata.contains_key(META_RESTORED_FROM_COMMIT));
    assert!(!atom.metadata.contains_key(META_COMPACTION_TIER));
    assert_eq!(guard.comments_for(&atom_id).len(), 5);
}

#[test]
fn restore_rejects_uncompacted_atoms_and_is_stable_on_retry() {
    let (_dir, shared, atom_id) = seeded_repo();
    let restorer = Restorer::new(Arc::clone(&shared), GitAdapter::new());

    assert!(!restorer.can_restore(&atom_id));
    let err = restorer.restore(&atom_id).unwrap_err();
    assert!(matches!(err, RestoreError::NotCompacted { .. }));

    let compactor = Compactor::new(Arc::clone(&shared));
    assert!(compactor.compact(&atom_id, 1).success);
    restorer.restore(&atom_id).unwrap();

    // A second restore finds a clean atom and changes nothing.
    let before = shared.read().unwrap().find_atom(&atom_id).unwrap();
    let err = restorer.restore(&atom_id).unwrap_err();
    assert!(matches!(err, RestoreError::NotCompacted { .. }));
    let after = shared.read().unwrap().find_atom(&atom_id).unwrap();
    assert_eq!(before, after);
}

#[test]
fn restore_fails_cleanly_without_history() {
    let dir = tempfile::tempdir().unwrap();
    git(dir.path(), &["init", "-b", "main"]);
    std::fs::create_dir_all(dir.path().join(".eluent")).unwrap();
    std::fs::write(dir.path().join(".eluent/config.yaml"), "repo_name: proj\n").unwrap();

    let mut repo = Repository::init(dir.path()).unwrap();
    let atom = repo.create_atom("never committed").unwrap();
    let mut closed = atom.clone();
    closed.status = AtomStatus::Closed;
    repo.update_atom(closed).unwrap();
    let shared: SharedRepository = Arc::new(RwLock::new(repo));

    let compactor = Compactor::new(Arc::clone(&shared));
    assert!(compactor.compact(&atom.id, 1).success);

    let restorer = Restorer::new(Arc::clone(&shared), GitAdapter::new());
    assert!(!restorer.can_restore(&atom.id));
    let err = restorer.restore(&atom.id).unwrap_err();
    assert!(matches!(err, RestoreError::HistoryNotFound { .. }));
}
