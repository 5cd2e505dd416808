//! Comment domain model.
//!
//! # Invariants
//! - `id` is `<parent_atom_id>-c<index>` with a per-atom monotonic index.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static COMMENT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<parent>.+)-c(?P<index>\d+)$").expect("valid comment id regex"));

/// Discussion entry attached to an atom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// `<parent_atom_id>-c<index>`.
    pub id: String,
    /// Owning atom id.
    pub parent_id: String,
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Comment {
    /// Creates a comment with matching created/updated instants.
    pub fn new(
        id: impl Into<String>,
        parent_id: impl Into<String>,
        author: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            parent_id: parent_id.into(),
            author: author.into(),
            content: content.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Parses the numeric index out of the comment id.
    pub fn index(&self) -> Option<u32> {
        COMMENT_ID_RE
            .captures(&self.id)
            .and_then(|caps| caps["index"].parse().ok())
    }
}
