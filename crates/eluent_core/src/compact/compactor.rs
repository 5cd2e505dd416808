//! Tiered compaction of closed work items.
//!
//! # Responsibility
//! - Select eligible atoms, apply description/comment compaction, and
//!   collect per-item batch results.
//!
//! # Invariants
//! - Only terminal atoms (`closed`/`discard`) are ever compacted.
//! - The compaction tier advances monotonically; tier 2 preserves the
//!   original sizes recorded at tier 1.
//! - A batch never aborts on a single item failure.

use crate::compact::summarizer::{summarize_comments, summarize_description};
use crate::model::atom::{
    Atom, META_COMPACTED_AT, META_COMPACTION_TIER, META_ORIGINAL_COMMENT_COUNT,
    META_ORIGINAL_DESCRIPTION_LEN,
};
use crate::repo::cache::SharedRepository;
use crate::repo::data_file::Repository;
use chrono::{DateTime, Duration, Utc};
use log::info;
use serde_json::Value;

/// Age threshold for tier-1 eligibility.
pub const TIER1_AGE_DAYS: i64 = 30;
/// Age threshold for tier-2 eligibility.
pub const TIER2_AGE_DAYS: i64 = 90;

/// Per-atom result of one compaction (or preview) pass.
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    pub atom_id: String,
    pub tier: u32,
    pub success: bool,
    pub error: Option<String>,
    pub description_before: usize,
    pub description_after: usize,
    pub comments_before: usize,
    pub comments_after: usize,
}

impl CompactionOutcome {
    fn failure(atom_id: &str, tier: u32, error: impl Into<String>) -> Self {
        Self {
            atom_id: atom_id.to_string(),
            tier,
            success: false,
            error: Some(error.into()),
            description_before: 0,
            description_after: 0,
            comments_before: 0,
            comments_after: 0,
        }
    }
}

/// Applies tiered aging to one repository.
pub struct Compactor {
    repo: SharedRepository,
}

impl Compactor {
    pub fn new(repo: SharedRepository) -> Self {
        Self { repo }
    }

    /// Age threshold for a tier; tiers outside {1, 2} have none.
    pub fn threshold(tier: u32) -> Option<Duration> {
        match tier {
            1 => Some(Duration::days(TIER1_AGE_DAYS)),
            2 => Some(Duration::days(TIER2_AGE_DAYS)),
            _ => None,
        }
    }

    /// Whether `atom` qualifies for compaction to `tier` as of `now`.
    pub fn eligible(atom: &Atom, tier: u32, now: DateTime<Utc>) -> bool {
        let Some(threshold) = Self::threshold(tier) else {
            return false;
        };
        atom.status.is_terminal()
            && atom.updated_at < now - threshold
            && atom.compaction_tier() < tier
    }

    /// Compacts one atom to `tier`, updating description, metadata, and
    /// comments.
    pub fn compact(&self, atom_id: &str, tier: u32) -> CompactionOutcome {
        let mut repo = self.write_repo();
        self.compact_inner(&mut repo, atom_id, tier)
    }

    fn compact_inner(
        &self,
        repo: &mut Repository,
        atom_id: &str,
        tier: u32,
    ) -> CompactionOutcome {
        if Self::threshold(tier).is_none() {
            return CompactionOutcome::failure(atom_id, tier, format!("unknown tier {tier}"));
        }
        let Some(mut atom) = repo.find_atom(atom_id) else {
            return CompactionOutcome::failure(atom_id, tier, format!("atom not found: {atom_id}"));
        };
        if !atom.status.is_terminal() {
            return CompactionOutcome::failure(
                atom_id,
                tier,
                format!("atom status `{}` is not terminal", atom.status),
            );
        }
        if atom.compaction_tier() >= tier {
            return CompactionOutcome::failure(
                atom_id,
                tier,
                format!("atom is already at tier {}", atom.compaction_tier()),
            );
        }

        let comments = repo.comments_for(atom_id);
        let description_before = atom.description.chars().count();
        let comments_before = comments.len();

        let summary = summarize_description(&atom.description, tier);
        let comment_summary = if tier == 1 {
            summarize_comments(&comments)
        } else {
            None
        };

        atom.description = summary;
        atom.metadata
            .insert(META_COMPACTION_TIER.to_string(), Value::from(tier));
        atom.metadata.insert(
            META_COMPACTED_AT.to_string(),
            Value::from(Utc::now().to_rfc3339()),
        );
        // Tier 2 after tier 1 keeps the sizes recorded before any
        // compaction happened.
        atom.metadata
            .entry(META_ORIGINAL_DESCRIPTION_LEN.to_string())
            .or_insert_with(|| Value::from(description_before as u64));
        atom.metadata
            .entry(META_ORIGINAL_COMMENT_COUNT.to_string())
            .or_insert_with(|| Value::from(comments_before as u64));

        let description_after = atom.description.chars().count();
        if let Err(err) = repo.update_atom(atom) {
            return CompactionOutcome::failure(atom_id, tier, err.to_string());
        }

        let comment_result = repo.compact_comments(atom_id, comment_summary.clone());
        if let Err(err) = comment_result {
            return CompactionOutcome::failure(
                atom_id,
                tier,
                format!("comment compaction failed: {err}"),
            );
        }
        let comments_after = usize::from(comment_summary.is_some());

        info!(
            "event=compact module=compact status=ok atom_id={atom_id} tier={tier} desc={description_before}->{description_after} comments={comments_before}->{comments_after}"
        );
        CompactionOutcome {
            atom_id: atom_id.to_string(),
            tier,
            success: true,
            error: None,
            description_before,
            description_after,
            comments_before,
            comments_after,
        }
    }

    /// Compacts every eligible atom, collecting per-item outcomes.
    ///
    /// `cutoff` overrides the default `now - threshold(tier)` boundary.
    /// With `preview` set, nothing is mutated and outcomes carry projected
    /// sizes only.
    pub fn compact_all(
        &self,
        tier: u32,
        cutoff: Option<DateTime<Utc>>,
        preview: bool,
    ) -> Vec<CompactionOutcome> {
        let candidates = {
            let repo = self.read_repo();
            let boundary = cutoff.unwrap_or_else(|| {
                Utc::now() - Self::threshold(tier).unwrap_or_else(Duration::zero)
            });
            repo.all_atoms()
                .into_iter()
                .filter(|atom| {
                    atom.status.is_terminal()
                        && atom.updated_at < boundary
                        && atom.compaction_tier() < tier
                })
                .map(|atom| atom.id)
                .collect::<Vec<_>>()
        };

        candidates
            .iter()
            .map(|atom_id| {
                if preview {
                    self.preview(atom_id, tier)
                } else {
                    self.compact(atom_id, tier)
                }
            })
            .collect()
    }

    /// Projects before/after sizes without mutating anything.
    pub fn preview(&self, atom_id: &str, tier: u32) -> CompactionOutcome {
        let repo = self.read_repo();
        let Some(atom) = repo.find_atom(atom_id) else {
            return CompactionOutcome::failure(atom_id, tier, format!("atom not found: {atom_id}"));
        };

        let comments = repo.comments_for(atom_id);
        let summary = summarize_description(&atom.description, tier);
        CompactionOutcome {
            atom_id: atom_id.to_string(),
            tier,
            success: true,
            error: None,
            description_before: atom.description.chars().count(),
            description_after: summary.chars().count(),
            comments_before: comments.len(),
            comments_after: usize::from(tier == 1 && !comments.is_empty()),
        }
    }

    fn write_repo(&self) -> std::sync::RwLockWriteGuard<'_, Repository> {
        self.repo
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_repo(&self) -> std::sync::RwLockReadGuard<'_, Repository> {
        self.repo
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::Compactor;
    use crate::model::atom::{Atom, AtomStatus};
    use chrono::{Duration, Utc};

    fn terminal_atom(days_old: i64, tier: u32) -> Atom {
        let mut atom = Atom::new("proj-01JBZTMQ1RABCDEFGHKMNPQRST", "old item");
        atom.status = AtomStatus::Closed;
        atom.updated_at = Utc::now() - Duration::days(days_old);
        if tier > 0 {
            atom.metadata.insert(
                crate::model::atom::META_COMPACTION_TIER.to_string(),
                serde_json::Value::from(tier),
            );
        }
        atom
    }

    #[test]
    fn eligibility_requires_terminal_age_and_lower_tier() {
        let now = Utc::now();
        assert!(Compactor::eligible(&terminal_atom(40, 0), 1, now));
        assert!(!Compactor::eligible(&terminal_atom(10, 0), 1, now));
        assert!(!Compactor::eligible(&terminal_atom(40, 1), 1, now));
        assert!(Compactor::eligible(&terminal_atom(100, 1), 2, now));

        let mut open = terminal_atom(40, 0);
        open.status = AtomStatus::Open;
        assert!(!Compactor::eligible(&open, 1, now));
    }

    #[test]
    fn unknown_tier_has_no_threshold() {
        assert!(Compactor::threshold(0).is_none());
        assert!(Compactor::threshold(3).is_none());
        assert!(Compactor::threshold(1).is_some());
    }
}
