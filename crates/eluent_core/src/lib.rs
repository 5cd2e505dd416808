//! Core logic for Eluent, a distributed work-item tracker.
//! This crate is the single source of truth for business invariants.

/// Tiered compaction, summarization, and history-based restore.
pub mod compact;
/// Repo configuration loading.
pub mod config;
/// Daemon claim/ledger command handlers and wire shapes.
pub mod daemon;
/// Thin typed wrapper around the git CLI.
pub mod git;
/// ULID codec, prefix trie, and id resolution.
pub mod id;
/// Ledger sync state and the distributed claim protocol.
pub mod ledger;
/// Structured logging initialization and status APIs.
pub mod logging;
/// Canonical atom/bond/comment data model.
pub mod model;
/// Repo-local and global filesystem layout.
pub mod paths;
/// JSONL persistence, registry, and the shared repository cache.
pub mod repo;

/// Re-export logging entry points for daemon/CLI layers.
pub use logging::{default_log_level, init_logging, logging_status, LoggingError, LoggingStatus};
/// Re-export canonical model types.
pub use model::atom::{
    register_issue_type, register_status, Atom, AtomStatus, AtomValidationError, IssueType,
};
pub use model::bond::{Bond, BondValidationError, DependencyType};
pub use model::comment::Comment;
pub use model::record::Record;
/// Re-export the identifier surface.
pub use id::resolver::{IdResolver, Resolution};
pub use id::trie::AtomIndexer;
pub use id::ulid::{
    compose_atom_id, compose_child_id, compose_comment_id, extract_randomness, extract_repo_name,
    extract_ulid, generate_ulid, parse_ulid, valid_atom_id, valid_ulid,
};
/// Re-export persistence and cache types.
pub use repo::cache::{RepositoryCache, SharedRepository};
pub use repo::data_file::{RepoError, RepoResult, Repository};
pub use repo::registry::{RegistryEntry, RepoRegistry};
/// Re-export the sync engine surface.
pub use ledger::state::{OfflineClaim, SyncState};
pub use ledger::syncer::{ClaimResult, LedgerSyncer, SyncStatus};
/// Re-export the compaction surface.
pub use compact::compactor::{CompactionOutcome, Compactor};
pub use compact::restore::{RestoreError, RestoreReport, Restorer};
/// Re-export the daemon command surface.
pub use daemon::handlers::DaemonHandlers;
pub use daemon::protocol::{ClaimRequest, HandlerResponse, LedgerSyncRequest};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
