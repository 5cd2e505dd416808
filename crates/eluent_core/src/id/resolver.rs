//! User-input id resolution.
//!
//! # Responsibility
//! - Turn a user-typed string into an exact atom, a candidate set, or a
//!   typed failure the caller can present.
//!
//! # Invariants
//! - Repo names are lowercased; randomness is uppercased and
//!   confusable-folded before any trie query.
//! - Prefixes shorter than [`MIN_PREFIX_CHARS`] are never queried.

use crate::id::trie::{normalize_randomness, AtomIndexer};
use crate::id::ulid::{
    compose_atom_id, extract_randomness, extract_repo_name, extract_ulid, valid_atom_id,
};
use crate::model::atom::Atom;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// Shortest randomness prefix the resolver will look up.
pub const MIN_PREFIX_CHARS: usize = 4;

static REPO_PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?P<name>[a-z][a-z0-9_-]{0,31})-(?P<rest>.+)$")
        .expect("valid repo prefix regex")
});

/// Outcome of resolving one user-typed identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Exactly one atom matched.
    Hit(Atom),
    /// Nothing matched the id or prefix.
    NotFound { query: String },
    /// Multiple atoms share the prefix.
    Ambiguous {
        candidates: Vec<Atom>,
        /// Candidate id -> its minimum unique randomness prefix.
        minimum_prefixes: BTreeMap<String, String>,
    },
    /// Prefix shorter than [`MIN_PREFIX_CHARS`].
    PrefixTooShort { prefix: String },
    /// Input starts with `.`; relative navigation is the caller's concern.
    RelativeReference { suffix: String },
    /// Empty or otherwise unusable input.
    InvalidInput { message: String },
}

/// Resolver over a borrowed indexer.
pub struct IdResolver<'idx> {
    indexer: &'idx AtomIndexer,
}

impl<'idx> IdResolver<'idx> {
    pub fn new(indexer: &'idx AtomIndexer) -> Self {
        Self { indexer }
    }

    /// Resolves user input against the index.
    ///
    /// `current_repo` scopes bare prefixes to one repo; an explicit
    /// `<repo>-` prefix in the input always wins.
    pub fn resolve(&self, input: &str, current_repo: Option<&str>) -> Resolution {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Resolution::InvalidInput {
                message: "identifier is empty".to_string(),
            };
        }

        if let Some(suffix) = trimmed.strip_prefix('.') {
            return Resolution::RelativeReference {
                suffix: suffix.to_string(),
            };
        }

        if let Some(canonical) = canonicalize_full_id(trimmed) {
            return match self.indexer.find_by_id(&canonical) {
                Some(atom) => Resolution::Hit(atom.clone()),
                None => Resolution::NotFound { query: canonical },
            };
        }

        let (repo, body) = match REPO_PREFIX_RE.captures(trimmed) {
            Some(caps) => (
                Some(caps["name"].to_ascii_lowercase()),
                caps["rest"].to_string(),
            ),
            None => (
                current_repo.map(|name| name.to_ascii_lowercase()),
                trimmed.to_string(),
            ),
        };

        let normalized = normalize_randomness(&body);
        if normalized.chars().count() < MIN_PREFIX_CHARS {
            return Resolution::PrefixTooShort { prefix: normalized };
        }

        let candidates = self
            .indexer
            .find_by_randomness_prefix(&normalized, repo.as_deref());
        match candidates.len() {
            0 => Resolution::NotFound {
                query: normalized,
            },
            1 => Resolution::Hit(candidates[0].clone()),
            _ => {
                let mut minimum_prefixes = BTreeMap::new();
                for candidate in &candidates {
                    if let Some(randomness) = extract_randomness(&candidate.id) {
                        let candidate_repo = extract_repo_name(&candidate.id);
                        if let Some(min_prefix) = self
                            .indexer
                            .minimum_unique_prefix(&randomness, candidate_repo.as_deref())
                        {
                            minimum_prefixes.insert(candidate.id.clone(), min_prefix);
                        }
                    }
                }
                Resolution::Ambiguous {
                    candidates: candidates.into_iter().cloned().collect(),
                    minimum_prefixes,
                }
            }
        }
    }
}

/// Canonicalizes a full atom id (repo lowered, ULID uppered), or `None`
/// when the input is not a full id.
fn canonicalize_full_id(input: &str) -> Option<String> {
    let lowered_repo = match REPO_PREFIX_RE.captures(input) {
        Some(caps) => format!("{}-{}", caps["name"].to_ascii_lowercase(), &caps["rest"]),
        None => return None,
    };

    if valid_atom_id(&lowered_repo) {
        // Re-split so the ULID segment is canonically upper-cased while
        // child segments keep their case.
        let repo = extract_repo_name(&lowered_repo)?;
        let ulid = extract_ulid(&lowered_repo)?;
        let head = compose_atom_id(&repo, &ulid);
        let tail_start = repo.len() + 1 + ulid.len();
        let tail = &lowered_repo[tail_start..];
        return Some(format!("{head}{tail}"));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::{IdResolver, Resolution, MIN_PREFIX_CHARS};
    use crate::id::trie::AtomIndexer;
    use crate::model::atom::Atom;

    const ID_A: &str = "foo-01JBZTMQ1RABCDEFGHKMNPQRST";
    const ID_B: &str = "foo-01JBZTMQ1RABCDEFGHKMNXXXXX";

    fn indexer_with(ids: &[&str]) -> AtomIndexer {
        let mut indexer = AtomIndexer::new();
        for id in ids {
            indexer.insert(Atom::new(*id, format!("atom {id}")));
        }
        indexer
    }

    #[test]
    fn empty_input_is_invalid() {
        let indexer = indexer_with(&[]);
        let resolver = IdResolver::new(&indexer);
        assert!(matches!(
            resolver.resolve("   ", None),
            Resolution::InvalidInput { .. }
        ));
    }

    #[test]
    fn leading_dot_defers_to_caller() {
        let indexer = indexer_with(&[]);
        let resolver = IdResolver::new(&indexer);
        match resolver.resolve(".2.1", None) {
            Resolution::RelativeReference { suffix } => assert_eq!(suffix, "2.1"),
            other => panic!("expected relative reference, got {other:?}"),
        }
    }

    #[test]
    fn full_id_resolves_exactly_and_canonicalizes_case() {
        let indexer = indexer_with(&[ID_A]);
        let resolver = IdResolver::new(&indexer);

        match resolver.resolve("FOO-01jbztmq1rabcdefghkmnpqrst", None) {
            Resolution::Hit(atom) => assert_eq!(atom.id, ID_A),
            other => panic!("expected hit, got {other:?}"),
        }

        assert!(matches!(
            resolver.resolve("foo-01JBZTMQ1RABCDEFGHKMNYYYYY", None),
            Resolution::NotFound { .. }
        ));
    }

    #[test]
    fn short_prefix_is_reported_not_queried() {
        let indexer = indexer_with(&[ID_A]);
        let resolver = IdResolver::new(&indexer);
        match resolver.resolve("ABC", Some("foo")) {
            Resolution::PrefixTooShort { prefix } => {
                assert!(prefix.chars().count() < MIN_PREFIX_CHARS);
            }
            other => panic!("expected prefix-too-short, got {other:?}"),
        }
    }

    #[test]
    fn ambiguous_prefix_reports_candidates_and_minimum_prefixes() {
        let indexer = indexer_with(&[ID_A, ID_B]);
        let resolver = IdResolver::new(&indexer);

        match resolver.resolve("ABCD", Some("foo")) {
            Resolution::Ambiguous {
                candidates,
                minimum_prefixes,
            } => {
                assert_eq!(candidates.len(), 2);
                assert_eq!(
                    minimum_prefixes.get(ID_A).map(String::as_str),
                    Some("ABCDEFGHKMNP")
                );
                assert_eq!(
                    minimum_prefixes.get(ID_B).map(String::as_str),
                    Some("ABCDEFGHKMNX")
                );
            }
            other => panic!("expected ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn confusables_resolve_to_the_same_atom() {
        let indexer = indexer_with(&["foo-01JBZTMQ1RABCDEF0123456712"]);
        let resolver = IdResolver::new(&indexer);

        // Lowercase l folds to 1 and o folds to 0.
        match resolver.resolve("abcdef0l23", Some("foo")) {
            Resolution::Hit(atom) => assert_eq!(atom.id, "foo-01JBZTMQ1RABCDEF0123456712"),
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[test]
    fn explicit_repo_prefix_overrides_current_repo() {
        let indexer = indexer_with(&[ID_A, "bar-01JBZTMQ1RZZZZEFGHKMNPQRST"]);
        let resolver = IdResolver::new(&indexer);

        match resolver.resolve("bar-ZZZZ", Some("foo")) {
            Resolution::Hit(atom) => assert!(atom.id.starts_with("bar-")),
            other => panic!("expected hit, got {other:?}"),
        }
    }
}
