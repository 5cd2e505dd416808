//! Prefix trie and shared atom indexer.
//!
//! # Responsibility
//! - Map ULID randomness prefixes to atom ids, one trie per repo.
//! - Answer minimum-unique-prefix queries for human-friendly display.
//!
//! # Invariants
//! - Stored keys and queries are both upper-cased and confusable-folded, so
//!   lookups are closed under `I/L -> 1`, `O -> 0`, `U -> V`.
//! - Prefix lookup cost is O(|prefix|), never O(atom count).
//! - Minimum unique prefixes are recomputed per query; no caching across
//!   insertions.

use crate::id::ulid::{extract_randomness, extract_repo_name};
use crate::model::atom::Atom;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Upper-cases and folds confusable characters of a randomness string.
pub fn normalize_randomness(input: &str) -> String {
    input
        .chars()
        .map(|c| match c.to_ascii_uppercase() {
            'I' | 'L' => '1',
            'O' => '0',
            'U' => 'V',
            other => other,
        })
        .collect()
}

#[derive(Debug, Default)]
struct TrieNode {
    children: BTreeMap<char, TrieNode>,
    /// Ids of every atom whose key passes through this node.
    ids: BTreeSet<String>,
}

/// Randomness-prefix trie over one repo's atoms.
#[derive(Debug, Default)]
pub struct PrefixTrie {
    root: TrieNode,
}

impl PrefixTrie {
    fn insert(&mut self, key: &str, id: &str) {
        let mut node = &mut self.root;
        for ch in key.chars() {
            node = node.children.entry(ch).or_default();
            node.ids.insert(id.to_string());
        }
    }

    fn remove(&mut self, key: &str, id: &str) {
        let chars: Vec<char> = key.chars().collect();
        remove_from(&mut self.root, &chars, id);
    }

    fn node_at<'trie>(&'trie self, prefix: &str) -> Option<&'trie TrieNode> {
        let mut node = &self.root;
        for ch in prefix.chars() {
            node = node.children.get(&ch)?;
        }
        Some(node)
    }

    /// Ids of atoms whose key starts with `prefix`, sorted.
    fn ids_with_prefix(&self, prefix: &str) -> Vec<String> {
        match self.node_at(prefix) {
            Some(node) => node.ids.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    fn count_with_prefix(&self, prefix: &str) -> usize {
        self.node_at(prefix).map_or(0, |node| node.ids.len())
    }

    fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }
}

fn remove_from(node: &mut TrieNode, key: &[char], id: &str) {
    if let Some((first, rest)) = key.split_first() {
        if let Some(child) = node.children.get_mut(first) {
            child.ids.remove(id);
            remove_from(child, rest, id);
            if child.ids.is_empty() {
                node.children.remove(first);
            }
        }
    }
}

/// Shared index over loaded atoms: by-id map plus per-repo prefix tries.
#[derive(Debug, Default)]
pub struct AtomIndexer {
    by_id: HashMap<String, Atom>,
    tries: BTreeMap<String, PrefixTrie>,
}

impl AtomIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces one atom.
    pub fn insert(&mut self, atom: Atom) {
        self.remove(&atom.id);
        if let (Some(repo), Some(randomness)) =
            (extract_repo_name(&atom.id), extract_randomness(&atom.id))
        {
            let key = normalize_randomness(&randomness);
            self.tries.entry(repo).or_default().insert(&key, &atom.id);
        }
        self.by_id.insert(atom.id.clone(), atom);
    }

    /// Removes one atom by id, returning it when present.
    pub fn remove(&mut self, atom_id: &str) -> Option<Atom> {
        let atom = self.by_id.remove(atom_id)?;
        if let (Some(repo), Some(randomness)) =
            (extract_repo_name(&atom.id), extract_randomness(&atom.id))
        {
            let key = normalize_randomness(&randomness);
            if let Some(trie) = self.tries.get_mut(&repo) {
                trie.remove(&key, &atom.id);
                if trie.is_empty() {
                    self.tries.remove(&repo);
                }
            }
        }
        Some(atom)
    }

    /// Drops all state and re-indexes the given atoms.
    pub fn rebuild_from(&mut self, atoms: impl IntoIterator<Item = Atom>) {
        self.by_id.clear();
        self.tries.clear();
        for atom in atoms {
            self.insert(atom);
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Looks up one atom by exact full id.
    pub fn find_by_id(&self, id: &str) -> Option<&Atom> {
        self.by_id.get(id)
    }

    /// Iterates all indexed atoms in unspecified order.
    pub fn atoms(&self) -> impl Iterator<Item = &Atom> {
        self.by_id.values()
    }

    /// Finds atoms whose normalized randomness starts with `prefix`.
    ///
    /// `repo` restricts the search to that repo's trie; `None` unions all
    /// repos. Results are sorted by id.
    pub fn find_by_randomness_prefix(&self, prefix: &str, repo: Option<&str>) -> Vec<&Atom> {
        let key = normalize_randomness(prefix);
        let mut ids: BTreeSet<String> = BTreeSet::new();
        match repo {
            Some(name) => {
                if let Some(trie) = self.tries.get(&name.to_ascii_lowercase()) {
                    ids.extend(trie.ids_with_prefix(&key));
                }
            }
            None => {
                for trie in self.tries.values() {
                    ids.extend(trie.ids_with_prefix(&key));
                }
            }
        }
        ids.iter().filter_map(|id| self.by_id.get(id)).collect()
    }

    /// Smallest prefix of `randomness` matched by exactly one atom.
    ///
    /// Returns `None` when no atom carries this randomness, or when another
    /// atom shares the full 16 characters (collision).
    pub fn minimum_unique_prefix(&self, randomness: &str, repo: Option<&str>) -> Option<String> {
        let key = normalize_randomness(randomness);
        for end in 1..=key.len() {
            let prefix = &key[..end];
            match self.count_matching(prefix, repo) {
                0 => return None,
                1 => return Some(prefix.to_string()),
                _ => {}
            }
        }
        None
    }

    fn count_matching(&self, prefix: &str, repo: Option<&str>) -> usize {
        match repo {
            Some(name) => self
                .tries
                .get(&name.to_ascii_lowercase())
                .map_or(0, |trie| trie.count_with_prefix(prefix)),
            None => self
                .tries
                .values()
                .map(|trie| trie.count_with_prefix(prefix))
                .sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_randomness, AtomIndexer};
    use crate::model::atom::Atom;

    fn atom(id: &str) -> Atom {
        Atom::new(id, format!("atom {id}"))
    }

    #[test]
    fn normalization_folds_confusables_and_case() {
        assert_eq!(normalize_randomness("abcdef0l234567"), "ABCDEF01234567");
        assert_eq!(normalize_randomness("IlOU"), "110V");
    }

    #[test]
    fn prefix_lookup_is_scoped_by_repo_and_unions_without() {
        let mut indexer = AtomIndexer::new();
        indexer.insert(atom("foo-01JBZTMQ1RABCDEFGHKMNPQRST"));
        indexer.insert(atom("bar-01JBZTMQ1RABCDEFGHKMNPQRST"));

        let scoped = indexer.find_by_randomness_prefix("ABCD", Some("foo"));
        assert_eq!(scoped.len(), 1);
        assert!(scoped[0].id.starts_with("foo-"));

        let unioned = indexer.find_by_randomness_prefix("ABCD", None);
        assert_eq!(unioned.len(), 2);
    }

    #[test]
    fn minimum_unique_prefix_extends_past_shared_run() {
        let mut indexer = AtomIndexer::new();
        indexer.insert(atom("foo-01JBZTMQ1RABCDEFGHKMNPQRST"));
        indexer.insert(atom("foo-01JBZTMQ1RABCDEFGHKMNXXXXX"));

        assert_eq!(
            indexer
                .minimum_unique_prefix("ABCDEFGHKMNPQRST", Some("foo"))
                .as_deref(),
            Some("ABCDEFGHKMNP")
        );
        assert_eq!(
            indexer
                .minimum_unique_prefix("ABCDEFGHKMNXXXXX", Some("foo"))
                .as_deref(),
            Some("ABCDEFGHKMNX")
        );
    }

    #[test]
    fn minimum_unique_prefix_handles_absent_and_colliding_randomness() {
        let mut indexer = AtomIndexer::new();
        indexer.insert(atom("foo-01JBZTMQ1RABCDEFGHKMNPQRST"));
        assert!(indexer
            .minimum_unique_prefix("ZZZZZZZZZZZZZZZZ", Some("foo"))
            .is_none());

        // Same randomness in two repos collides in the unscoped view.
        indexer.insert(atom("bar-01JBZTMQ1RABCDEFGHKMNPQRST"));
        assert!(indexer
            .minimum_unique_prefix("ABCDEFGHKMNPQRST", None)
            .is_none());
        assert!(indexer
            .minimum_unique_prefix("ABCDEFGHKMNPQRST", Some("foo"))
            .is_some());
    }

    #[test]
    fn remove_prunes_the_trie() {
        let mut indexer = AtomIndexer::new();
        indexer.insert(atom("foo-01JBZTMQ1RABCDEFGHKMNPQRST"));
        let removed = indexer.remove("foo-01JBZTMQ1RABCDEFGHKMNPQRST");
        assert!(removed.is_some());
        assert!(indexer.is_empty());
        assert!(indexer
            .find_by_randomness_prefix("ABCD", None)
            .is_empty());
    }

    #[test]
    fn reinsert_replaces_previous_entry() {
        let mut indexer = AtomIndexer::new();
        let mut first = atom("foo-01JBZTMQ1RABCDEFGHKMNPQRST");
        indexer.insert(first.clone());
        first.title = "renamed".to_string();
        indexer.insert(first);

        assert_eq!(indexer.len(), 1);
        let found = indexer
            .find_by_id("foo-01JBZTMQ1RABCDEFGHKMNPQRST")
            .expect("atom should be indexed");
        assert_eq!(found.title, "renamed");
    }

    #[test]
    fn rebuild_from_replaces_all_state() {
        let mut indexer = AtomIndexer::new();
        indexer.insert(atom("foo-01JBZTMQ1RABCDEFGHKMNPQRST"));
        indexer.rebuild_from(vec![atom("bar-01JBZTMQ1RABCDEFGHKMNXXXXX")]);

        assert!(indexer.find_by_id("foo-01JBZTMQ1RABCDEFGHKMNPQRST").is_none());
        assert!(indexer.find_by_id("bar-01JBZTMQ1RABCDEFGHKMNXXXXX").is_some());
    }
}
