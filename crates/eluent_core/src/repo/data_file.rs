//! Per-repo JSONL data file.
//!
//! # Responsibility
//! - Load, append, and rewrite the `.eluent/data.jsonl` record stream.
//! - Present entity views (atoms, comments, bonds) and the shared indexer.
//!
//! # Invariants
//! - Later records with the same identity supersede earlier ones on load.
//! - Malformed lines are skipped with a warning, never fatal.
//! - Unknown `_type` records survive load -> rewrite unchanged.

use crate::config::{ConfigError, RepoConfig};
use crate::id::resolver::IdResolver;
use crate::id::trie::AtomIndexer;
use crate::id::ulid::{compose_atom_id, compose_comment_id, generate_ulid, UlidError};
use crate::model::atom::{Atom, AtomValidationError};
use crate::model::bond::{Bond, BondValidationError};
use crate::model::comment::Comment;
use crate::model::record::{Record, RecordError};
use crate::paths::RepoPaths;
use crate::repo::write_atomic;
use log::{info, warn};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Author recorded on synthetic compaction-summary comments.
pub const SUMMARY_COMMENT_AUTHOR: &str = "eluent";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository-layer error for data-file operations.
#[derive(Debug)]
pub enum RepoError {
    /// `<root>/.eluent/` does not exist.
    NotInitialized(PathBuf),
    AtomNotFound(String),
    Validation(AtomValidationError),
    Bond(BondValidationError),
    Record(RecordError),
    Config(ConfigError),
    Id(UlidError),
    Io(std::io::Error),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInitialized(path) => {
                write!(f, "no .eluent directory under `{}`", path.display())
            }
            Self::AtomNotFound(id) => write!(f, "atom not found: {id}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Bond(err) => write!(f, "{err}"),
            Self::Record(err) => write!(f, "{err}"),
            Self::Config(err) => write!(f, "{err}"),
            Self::Id(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Bond(err) => Some(err),
            Self::Record(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::Id(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<AtomValidationError> for RepoError {
    fn from(value: AtomValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<BondValidationError> for RepoError {
    fn from(value: BondValidationError) -> Self {
        Self::Bond(value)
    }
}

impl From<RecordError> for RepoError {
    fn from(value: RecordError) -> Self {
        Self::Record(value)
    }
}

impl From<ConfigError> for RepoError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<UlidError> for RepoError {
    fn from(value: UlidError) -> Self {
        Self::Id(value)
    }
}

impl From<std::io::Error> for RepoError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// One loaded repository: record stream plus derived indexes.
#[derive(Debug)]
pub struct Repository {
    paths: RepoPaths,
    config: RepoConfig,
    repo_name: String,
    /// Records in file order; superseded entries are replaced in place.
    records: Vec<Record>,
    /// Supersede key -> position in `records`.
    keyed: HashMap<String, usize>,
    indexer: AtomIndexer,
}

impl Repository {
    /// Opens the repository at `root`, loading config and data file.
    ///
    /// # Errors
    /// - [`RepoError::NotInitialized`] when `<root>/.eluent` is absent.
    pub fn open(root: &Path) -> RepoResult<Self> {
        let paths = RepoPaths::new(root);
        if !paths.data_dir().is_dir() {
            return Err(RepoError::NotInitialized(root.to_path_buf()));
        }

        let config = RepoConfig::load(&paths.config_file())?;
        let repo_name = config
            .repo_name
            .clone()
            .or_else(|| {
                root.file_name()
                    .map(|name| sanitize_repo_name(&name.to_string_lossy()))
            })
            .unwrap_or_else(|| "repo".to_string());

        let mut repo = Self {
            paths,
            config,
            repo_name,
            records: Vec::new(),
            keyed: HashMap::new(),
            indexer: AtomIndexer::new(),
        };
        repo.load()?;
        Ok(repo)
    }

    /// Creates the `.eluent` directory and an empty data file, then opens.
    pub fn init(root: &Path) -> RepoResult<Self> {
        let paths = RepoPaths::new(root);
        std::fs::create_dir_all(paths.data_dir())?;
        if !paths.data_file().exists() {
            std::fs::File::create(paths.data_file())?;
        }
        Self::open(root)
    }

    fn load(&mut self) -> RepoResult<()> {
        self.records.clear();
        self.keyed.clear();

        let data_file = self.paths.data_file();
        if data_file.exists() {
            let reader = BufReader::new(std::fs::File::open(&data_file)?);
            for (line_number, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match Record::from_json_line(&line) {
                    Ok(record) => self.upsert_in_memory(record),
                    Err(err) => warn!(
                        "event=data_load module=repo status=skipped_line file={} line={} error={}",
                        data_file.display(),
                        line_number + 1,
                        err
                    ),
                }
            }
        }

        let atoms: Vec<Atom> = self
            .records
            .iter()
            .filter_map(|record| match record {
                Record::Atom(atom) => Some(atom.clone()),
                _ => None,
            })
            .collect();
        self.indexer.rebuild_from(atoms);
        Ok(())
    }

    fn upsert_in_memory(&mut self, record: Record) {
        match record.key() {
            Some(key) => match self.keyed.get(&key) {
                Some(&position) => self.records[position] = record,
                None => {
                    self.keyed.insert(key, self.records.len());
                    self.records.push(record);
                }
            },
            None => self.records.push(record),
        }
    }

    fn append_record(&mut self, record: Record) -> RepoResult<()> {
        let line = record.to_json_line()?;
        std::fs::create_dir_all(self.paths.data_dir())?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.paths.data_file())?;
        writeln!(file, "{line}")?;
        file.flush()?;

        if let Record::Atom(atom) = &record {
            self.indexer.insert(atom.clone());
        }
        self.upsert_in_memory(record);
        Ok(())
    }

    /// Rewrites the whole data file from in-memory records, durably.
    fn rewrite_all(&self) -> RepoResult<()> {
        let mut contents = String::new();
        for record in &self.records {
            contents.push_str(&record.to_json_line()?);
            contents.push('\n');
        }
        write_atomic(&self.paths.data_file(), contents.as_bytes())?;
        Ok(())
    }

    /// Repo name used as the atom-id prefix.
    pub fn repo_name(&self) -> &str {
        &self.repo_name
    }

    pub fn paths(&self) -> &RepoPaths {
        &self.paths
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn indexer(&self) -> &AtomIndexer {
        &self.indexer
    }

    /// Resolver borrowing the shared indexer.
    pub fn id_resolver(&self) -> IdResolver<'_> {
        IdResolver::new(&self.indexer)
    }

    /// Looks up one atom by exact full id.
    pub fn find_atom(&self, id: &str) -> Option<Atom> {
        self.indexer.find_by_id(id).cloned()
    }

    /// All loaded atoms, sorted by id for deterministic output.
    pub fn all_atoms(&self) -> Vec<Atom> {
        let mut atoms: Vec<Atom> = self.indexer.atoms().cloned().collect();
        atoms.sort_by(|a, b| a.id.cmp(&b.id));
        atoms
    }

    /// Comments attached to `atom_id`, sorted by index.
    pub fn comments_for(&self, atom_id: &str) -> Vec<Comment> {
        let mut comments: Vec<Comment> = self
            .records
            .iter()
            .filter_map(|record| match record {
                Record::Comment(comment) if comment.parent_id == atom_id => {
                    Some(comment.clone())
                }
                _ => None,
            })
            .collect();
        comments.sort_by_key(|comment| comment.index().unwrap_or(u32::MAX));
        comments
    }

    /// Bonds whose source or target is `atom_id`.
    pub fn bonds_for(&self, atom_id: &str) -> Vec<Bond> {
        self.records
            .iter()
            .filter_map(|record| match record {
                Record::Bond(bond)
                    if bond.source_id == atom_id || bond.target_id == atom_id =>
                {
                    Some(bond.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Creates a new atom with a freshly generated id and appends it.
    pub fn create_atom(&mut self, title: impl Into<String>) -> RepoResult<Atom> {
        let ulid = generate_ulid()?;
        let id = compose_atom_id(&self.repo_name, &ulid);
        let atom = Atom::try_new(id, title)?;
        self.append_record(Record::Atom(atom.clone()))?;
        info!(
            "event=atom_create module=repo status=ok atom_id={}",
            atom.id
        );
        Ok(atom)
    }

    /// Writes a superseding record for an existing atom.
    ///
    /// Advances `updated_at` monotonically before persisting.
    pub fn update_atom(&mut self, mut atom: Atom) -> RepoResult<Atom> {
        if self.indexer.find_by_id(&atom.id).is_none() {
            return Err(RepoError::AtomNotFound(atom.id));
        }
        atom.touch();
        atom.validate()?;
        self.append_record(Record::Atom(atom.clone()))?;
        Ok(atom)
    }

    /// Applies an atom record from the ledger without touching timestamps.
    pub fn apply_remote_atom(&mut self, atom: Atom) -> RepoResult<()> {
        atom.validate()?;
        self.append_record(Record::Atom(atom))
    }

    /// Appends records replayed from the ledger, skipping ones that match
    /// current state. Returns how many records changed state.
    pub fn apply_records(&mut self, records: Vec<Record>) -> RepoResult<usize> {
        let mut changed = 0;
        for record in records {
            let same = record
                .key()
                .and_then(|key| self.keyed.get(&key))
                .map(|&position| self.records[position] == record)
                .unwrap_or(false);
            if same {
                continue;
            }
            self.append_record(record)?;
            changed += 1;
        }
        Ok(changed)
    }

    /// Creates a comment under an existing atom.
    ///
    /// The index continues from the highest existing comment index.
    pub fn create_comment(
        &mut self,
        parent_id: &str,
        author: impl Into<String>,
        content: impl Into<String>,
    ) -> RepoResult<Comment> {
        if self.indexer.find_by_id(parent_id).is_none() {
            return Err(RepoError::AtomNotFound(parent_id.to_string()));
        }

        let next_index = self
            .comments_for(parent_id)
            .iter()
            .filter_map(Comment::index)
            .max()
            .map_or(1, |highest| highest + 1);
        let comment = Comment::new(
            compose_comment_id(parent_id, next_index),
            parent_id,
            author,
            content,
        );
        self.append_record(Record::Comment(comment.clone()))?;
        Ok(comment)
    }

    /// Re-creates a comment from historical data, keeping its id and times.
    pub fn restore_comment(&mut self, comment: Comment) -> RepoResult<()> {
        if self.indexer.find_by_id(&comment.parent_id).is_none() {
            return Err(RepoError::AtomNotFound(comment.parent_id));
        }
        self.append_record(Record::Comment(comment))
    }

    /// Creates a bond after validation; duplicate bonds supersede in place.
    pub fn create_bond(&mut self, bond: Bond) -> RepoResult<()> {
        bond.validate()?;
        for endpoint in [&bond.source_id, &bond.target_id] {
            if self.indexer.find_by_id(endpoint).is_none() {
                return Err(RepoError::AtomNotFound(endpoint.clone()));
            }
        }
        self.append_record(Record::Bond(bond))
    }

    /// Replaces all comments of `atom_id` with one synthetic summary, or
    /// removes them entirely when `summary` is `None`.
    ///
    /// Returns the number of comments removed. Rewrites the data file
    /// durably because records are dropped, not superseded.
    pub fn compact_comments(
        &mut self,
        atom_id: &str,
        summary: Option<String>,
    ) -> RepoResult<usize> {
        if self.indexer.find_by_id(atom_id).is_none() {
            return Err(RepoError::AtomNotFound(atom_id.to_string()));
        }

        let before = self.records.len();
        self.records.retain(|record| match record {
            Record::Comment(comment) => comment.parent_id != atom_id,
            _ => true,
        });
        let removed = before - self.records.len();
        self.reindex_keys();

        if let Some(content) = summary {
            let comment = Comment::new(
                compose_comment_id(atom_id, 1),
                atom_id,
                SUMMARY_COMMENT_AUTHOR,
                content,
            );
            self.upsert_in_memory(Record::Comment(comment));
        }

        self.rewrite_all()?;
        info!(
            "event=comments_compact module=repo status=ok atom_id={atom_id} removed={removed}"
        );
        Ok(removed)
    }

    fn reindex_keys(&mut self) {
        self.keyed.clear();
        for (position, record) in self.records.iter().enumerate() {
            if let Some(key) = record.key() {
                self.keyed.insert(key, position);
            }
        }
    }

    /// Records currently held in memory, in file order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }
}

/// Folds an arbitrary directory name into a valid repo name:
/// lower-cased, restricted to `[a-z0-9_-]`, forced to start with a letter.
fn sanitize_repo_name(raw: &str) -> String {
    let mut name: String = raw
        .to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-')
        .collect();
    while let Some(first) = name.chars().next() {
        if first.is_ascii_lowercase() {
            break;
        }
        name.remove(0);
    }
    name.truncate(32);
    if name.is_empty() {
        "repo".to_string()
    } else {
        name
    }
}
