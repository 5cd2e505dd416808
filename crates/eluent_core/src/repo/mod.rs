//! Repository layer: per-repo JSONL storage, global registry, shared cache.
//!
//! # Responsibility
//! - Define data-access contracts over the append-friendly data file.
//! - Keep file-format details out of sync/compaction orchestration.
//!
//! # Invariants
//! - Writes validate records before persistence.
//! - Whole-file rewrites are atomic (temp file + fsync + rename); appends
//!   are line-atomic.

use std::io::Write;
use std::path::Path;

pub mod cache;
pub mod data_file;
pub mod registry;

/// Durably replaces `path` with `contents` via temp file + fsync + rename.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::other("path has no parent directory"))?;
    std::fs::create_dir_all(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(path)
        .map_err(|err| err.error)?;
    Ok(())
}
