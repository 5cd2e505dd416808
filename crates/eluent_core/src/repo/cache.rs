//! Thread-safe repository cache.
//!
//! # Responsibility
//! - Share one loaded `Repository` per path across daemon handler threads.
//! - Indirect name-based lookups through the global registry.
//!
//! # Invariants
//! - The cache map is guarded by one mutex; entries are inserted with a
//!   check-then-insert pattern under that lock.
//! - Each repository is wrapped in its own `RwLock`: single writer, many
//!   readers per repo.

use crate::id::ulid::extract_repo_name;
use crate::model::atom::Atom;
use crate::paths::GlobalPaths;
use crate::repo::data_file::{RepoError, Repository};
use crate::repo::registry::{RegistryError, RepoRegistry};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

pub type CacheResult<T> = Result<T, CacheError>;

/// Cache/registry lookup error.
#[derive(Debug)]
pub enum CacheError {
    /// Name has no registry entry.
    UnknownRepoName(String),
    /// Id carries no recognizable repo prefix.
    MalformedId(String),
    Repo(RepoError),
    Registry(RegistryError),
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownRepoName(name) => write!(f, "repo not registered: `{name}`"),
            Self::MalformedId(id) => write!(f, "cannot extract repo name from `{id}`"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::Registry(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CacheError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::Registry(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for CacheError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<RegistryError> for CacheError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

/// Shared handle to one cached repository.
pub type SharedRepository = Arc<RwLock<Repository>>;

/// Path-keyed cache of loaded repositories plus the name registry.
pub struct RepositoryCache {
    global: GlobalPaths,
    repos: Mutex<HashMap<PathBuf, SharedRepository>>,
    registry: Mutex<RepoRegistry>,
}

impl RepositoryCache {
    /// Creates a cache rooted at the given global state directory.
    pub fn new(global: GlobalPaths) -> CacheResult<Self> {
        let registry = RepoRegistry::load(global.registry_file())?;
        Ok(Self {
            global,
            repos: Mutex::new(HashMap::new()),
            registry: Mutex::new(registry),
        })
    }

    pub fn global_paths(&self) -> &GlobalPaths {
        &self.global
    }

    /// Loads (or returns the cached) repository at `path`.
    pub fn get(&self, path: &Path) -> CacheResult<SharedRepository> {
        let key = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());
        let mut repos = self
            .repos
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = repos.get(&key) {
            return Ok(Arc::clone(existing));
        }
        let repo = Repository::open(&key)?;
        let shared = Arc::new(RwLock::new(repo));
        repos.insert(key, Arc::clone(&shared));
        Ok(shared)
    }

    /// Resolves a registered name through the registry, then loads.
    pub fn get_by_name(&self, name: &str) -> CacheResult<SharedRepository> {
        let path = {
            let registry = self
                .registry
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            registry
                .find_by_name(name)
                .map(|entry| entry.path.clone())
                .ok_or_else(|| CacheError::UnknownRepoName(name.to_string()))?
        };
        self.get(&path)
    }

    /// Registers a repo name -> path mapping in the global registry.
    pub fn register(
        &self,
        name: &str,
        path: &Path,
        remote: Option<String>,
    ) -> CacheResult<()> {
        let mut registry = self
            .registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        registry.register(name, path, remote)?;
        Ok(())
    }

    /// Finds an atom anywhere by its full id, via registry and cache.
    pub fn find_atom_by_full_id(&self, id: &str) -> CacheResult<Option<Atom>> {
        let repo_name =
            extract_repo_name(id).ok_or_else(|| CacheError::MalformedId(id.to_string()))?;
        let shared = self.get_by_name(&repo_name)?;
        let repo = shared
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(repo.find_atom(id))
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheError, RepositoryCache};
    use crate::paths::GlobalPaths;
    use crate::repo::data_file::Repository;

    fn cache_in(dir: &tempfile::TempDir) -> RepositoryCache {
        RepositoryCache::new(GlobalPaths::with_base(dir.path().join("global")))
            .expect("cache should build")
    }

    #[test]
    fn get_caches_by_path() {
        let dir = tempfile::tempdir().expect("temp dir");
        let repo_root = dir.path().join("proj");
        std::fs::create_dir_all(&repo_root).expect("mkdir");
        Repository::init(&repo_root).expect("init repo");

        let cache = cache_in(&dir);
        let first = cache.get(&repo_root).expect("first load");
        let second = cache.get(&repo_root).expect("cached load");
        assert!(std::sync::Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn missing_data_dir_is_a_repo_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cache = cache_in(&dir);
        let err = cache
            .get(&dir.path().join("nowhere"))
            .expect_err("uninitialized repo must fail");
        assert!(matches!(err, CacheError::Repo(_)));
    }

    #[test]
    fn full_id_lookup_goes_through_registry() {
        let dir = tempfile::tempdir().expect("temp dir");
        let repo_root = dir.path().join("proj");
        std::fs::create_dir_all(&repo_root).expect("mkdir");
        std::fs::create_dir_all(repo_root.join(".eluent")).expect("mkdir data");
        std::fs::write(
            repo_root.join(".eluent/config.yaml"),
            "repo_name: proj\n",
        )
        .expect("write config");
        let mut repo = Repository::init(&repo_root).expect("init repo");
        let atom = repo.create_atom("tracked").expect("create atom");
        drop(repo);

        let cache = cache_in(&dir);
        cache
            .register("proj", &repo_root, None)
            .expect("register should work");

        let found = cache
            .find_atom_by_full_id(&atom.id)
            .expect("lookup should work")
            .expect("atom should be found");
        assert_eq!(found.id, atom.id);

        let unknown = cache.get_by_name("ghost");
        assert!(matches!(unknown, Err(CacheError::UnknownRepoName(_))));
    }
}
