//! Atom domain model.
//!
//! # Responsibility
//! - Define the canonical work-item record and its lifecycle enums.
//! - Provide the process-wide registry for host-defined status/type names.
//!
//! # Invariants
//! - `id` is a well-formed full atom id and never reused.
//! - Atoms are never physically deleted; `closed`/`discard` are terminal.
//! - `updated_at` is monotonic under `touch()`.

use crate::id::ulid::valid_atom_id;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::RwLock;

/// Maximum title length in characters.
pub const MAX_TITLE_CHARS: usize = 500;
/// Maximum description length in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 65_536;

/// Metadata key carrying the current compaction tier.
pub const META_COMPACTION_TIER: &str = "compaction_tier";
/// Metadata key carrying the compaction instant (RFC3339 UTC).
pub const META_COMPACTED_AT: &str = "compacted_at";
/// Metadata key carrying the pre-compaction description length.
pub const META_ORIGINAL_DESCRIPTION_LEN: &str = "original_description_length";
/// Metadata key carrying the pre-compaction comment count.
pub const META_ORIGINAL_COMMENT_COUNT: &str = "original_comment_count";
/// Metadata key written last during restoration (RFC3339 UTC).
pub const META_RESTORED_AT: &str = "restored_at";
/// Metadata key naming the commit content was restored from.
pub const META_RESTORED_FROM_COMMIT: &str = "restored_from_commit";

static CUSTOM_STATUSES: Lazy<RwLock<BTreeSet<String>>> =
    Lazy::new(|| RwLock::new(BTreeSet::new()));
static CUSTOM_ISSUE_TYPES: Lazy<RwLock<BTreeSet<String>>> =
    Lazy::new(|| RwLock::new(BTreeSet::new()));

/// Atom lifecycle status.
///
/// Known variants deserialize by snake_case name; additional names accepted
/// at runtime must be registered through [`register_status`] first and map
/// to `Custom`. Equality is by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtomStatus {
    Open,
    InProgress,
    Blocked,
    Deferred,
    Review,
    Testing,
    Closed,
    Discard,
    WontDo,
    /// Host-registered status name.
    Custom(String),
}

impl AtomStatus {
    /// Canonical snake_case name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Deferred => "deferred",
            Self::Review => "review",
            Self::Testing => "testing",
            Self::Closed => "closed",
            Self::Discard => "discard",
            Self::WontDo => "wont_do",
            Self::Custom(name) => name,
        }
    }

    /// Parses a status name, consulting the host registry for custom names.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "blocked" => Some(Self::Blocked),
            "deferred" => Some(Self::Deferred),
            "review" => Some(Self::Review),
            "testing" => Some(Self::Testing),
            "closed" => Some(Self::Closed),
            "discard" => Some(Self::Discard),
            "wont_do" => Some(Self::WontDo),
            other => {
                let registry = CUSTOM_STATUSES.read().ok()?;
                registry
                    .contains(other)
                    .then(|| Self::Custom(other.to_string()))
            }
        }
    }

    /// Returns whether this status is eligible for compaction.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Discard)
    }

    /// Returns whether an exclusive-work claim may target this status.
    pub fn is_claimable(&self) -> bool {
        !matches!(self, Self::Closed | Self::Discard | Self::Blocked)
    }
}

impl Display for AtomStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AtomStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AtomStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Self::from_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown atom status `{name}`")))
    }
}

/// Work-item category.
///
/// Same registry contract as [`AtomStatus`]: built-in names plus host
/// registrations through [`register_issue_type`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueType {
    Bug,
    Feature,
    Task,
    Chore,
    Epic,
    /// Host-registered issue-type name.
    Custom(String),
}

impl IssueType {
    /// Canonical snake_case name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Bug => "bug",
            Self::Feature => "feature",
            Self::Task => "task",
            Self::Chore => "chore",
            Self::Epic => "epic",
            Self::Custom(name) => name,
        }
    }

    /// Parses an issue-type name, consulting the host registry.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bug" => Some(Self::Bug),
            "feature" => Some(Self::Feature),
            "task" => Some(Self::Task),
            "chore" => Some(Self::Chore),
            "epic" => Some(Self::Epic),
            other => {
                let registry = CUSTOM_ISSUE_TYPES.read().ok()?;
                registry
                    .contains(other)
                    .then(|| Self::Custom(other.to_string()))
            }
        }
    }
}

impl Display for IssueType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for IssueType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for IssueType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Self::from_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown issue type `{name}`")))
    }
}

/// Registers an additional status name at host init time.
///
/// # Errors
/// - Returns [`AtomValidationError::InvalidEnumName`] for names outside
///   `[a-z][a-z0-9_]*`.
pub fn register_status(name: &str) -> Result<(), AtomValidationError> {
    register_variant(&CUSTOM_STATUSES, name)
}

/// Registers an additional issue-type name at host init time.
pub fn register_issue_type(name: &str) -> Result<(), AtomValidationError> {
    register_variant(&CUSTOM_ISSUE_TYPES, name)
}

fn register_variant(
    registry: &Lazy<RwLock<BTreeSet<String>>>,
    name: &str,
) -> Result<(), AtomValidationError> {
    if !is_valid_variant_name(name) {
        return Err(AtomValidationError::InvalidEnumName(name.to_string()));
    }
    let mut names = registry
        .write()
        .map_err(|_| AtomValidationError::InvalidEnumName(name.to_string()))?;
    names.insert(name.to_string());
    Ok(())
}

fn is_valid_variant_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Atom validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtomValidationError {
    InvalidId(String),
    TitleTooLong { chars: usize },
    DescriptionTooLong { chars: usize },
    InvalidParentId(String),
    InvalidEnumName(String),
}

impl Display for AtomValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidId(id) => write!(f, "invalid atom id: `{id}`"),
            Self::TitleTooLong { chars } => {
                write!(f, "title is {chars} chars; limit is {MAX_TITLE_CHARS}")
            }
            Self::DescriptionTooLong { chars } => write!(
                f,
                "description is {chars} chars; limit is {MAX_DESCRIPTION_CHARS}"
            ),
            Self::InvalidParentId(id) => write!(f, "invalid parent atom id: `{id}`"),
            Self::InvalidEnumName(name) => write!(f, "invalid enum variant name: `{name}`"),
        }
    }
}

impl Error for AtomValidationError {}

/// Canonical work-item record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "AtomDe")]
pub struct Atom {
    /// Full atom id `<repo>-<ulid>[.<child>]*`.
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub status: AtomStatus,
    pub issue_type: IssueType,
    #[serde(default)]
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defer_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct AtomDe {
    id: String,
    title: String,
    #[serde(default)]
    description: String,
    status: AtomStatus,
    issue_type: IssueType,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    assignee: Option<String>,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    defer_until: Option<DateTime<Utc>>,
    #[serde(default)]
    close_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

impl TryFrom<AtomDe> for Atom {
    type Error = AtomValidationError;

    fn try_from(value: AtomDe) -> Result<Self, Self::Error> {
        let atom = Self {
            id: value.id,
            title: value.title,
            description: value.description,
            status: value.status,
            issue_type: value.issue_type,
            priority: value.priority,
            labels: value.labels,
            assignee: value.assignee,
            parent_id: value.parent_id,
            defer_until: value.defer_until,
            close_reason: value.close_reason,
            created_at: value.created_at,
            updated_at: value.updated_at,
            metadata: value.metadata,
        };
        atom.validate()?;
        Ok(atom)
    }
}

impl Atom {
    /// Creates a new open atom with the given full id.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            status: AtomStatus::Open,
            issue_type: IssueType::Task,
            priority: 0,
            labels: Vec::new(),
            assignee: None,
            parent_id: None,
            defer_until: None,
            close_reason: None,
            created_at: now,
            updated_at: now,
            metadata: BTreeMap::new(),
        }
    }

    /// Creates and validates a new atom.
    pub fn try_new(
        id: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self, AtomValidationError> {
        let atom = Self::new(id, title);
        atom.validate()?;
        Ok(atom)
    }

    /// Advances `updated_at` to now without ever moving it backwards.
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    /// Current compaction tier; 0 means never compacted.
    pub fn compaction_tier(&self) -> u32 {
        self.metadata
            .get(META_COMPACTION_TIER)
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32
    }

    /// Returns whether this atom currently carries compacted content.
    pub fn is_compacted(&self) -> bool {
        self.compaction_tier() > 0
    }

    /// Validates shape invariants before persistence boundary hand-off.
    ///
    /// # Errors
    /// - Returns [`AtomValidationError::InvalidId`] for malformed ids.
    /// - Returns the oversized-field variants for title/description limits.
    pub fn validate(&self) -> Result<(), AtomValidationError> {
        if !valid_atom_id(&self.id) {
            return Err(AtomValidationError::InvalidId(self.id.clone()));
        }

        let title_chars = self.title.chars().count();
        if title_chars > MAX_TITLE_CHARS {
            return Err(AtomValidationError::TitleTooLong { chars: title_chars });
        }

        let description_chars = self.description.chars().count();
        if description_chars > MAX_DESCRIPTION_CHARS {
            return Err(AtomValidationError::DescriptionTooLong {
                chars: description_chars,
            });
        }

        if let Some(parent_id) = &self.parent_id {
            if !valid_atom_id(parent_id) {
                return Err(AtomValidationError::InvalidParentId(parent_id.clone()));
            }
        }

        Ok(())
    }
}
