//! Bond domain model.
//!
//! # Responsibility
//! - Define typed directed relationships between two atoms.
//!
//! # Invariants
//! - `source_id != target_id`; self-referencing bonds are invalid.

use crate::id::ulid::valid_atom_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Relationship category between two atoms.
///
/// Unknown names deserialize into `Custom`, so host-defined bond types
/// survive load/rewrite cycles without registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyType {
    Blocks,
    DependsOn,
    Related,
    ParentChild,
    Custom(String),
}

impl DependencyType {
    /// Canonical snake_case name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Blocks => "blocks",
            Self::DependsOn => "depends_on",
            Self::Related => "related",
            Self::ParentChild => "parent_child",
            Self::Custom(name) => name,
        }
    }

    /// Parses a dependency-type name.
    pub fn from_name(name: &str) -> Self {
        match name {
            "blocks" => Self::Blocks,
            "depends_on" => Self::DependsOn,
            "related" => Self::Related,
            "parent_child" => Self::ParentChild,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl Display for DependencyType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DependencyType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DependencyType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_name(&name))
    }
}

/// Bond validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BondValidationError {
    InvalidSourceId(String),
    InvalidTargetId(String),
    SelfReference(String),
}

impl Display for BondValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSourceId(id) => write!(f, "invalid bond source id: `{id}`"),
            Self::InvalidTargetId(id) => write!(f, "invalid bond target id: `{id}`"),
            Self::SelfReference(id) => write!(f, "bond cannot reference itself: `{id}`"),
        }
    }
}

impl Error for BondValidationError {}

/// Typed directed relationship between two atoms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BondDe")]
pub struct Bond {
    pub source_id: String,
    pub target_id: String,
    pub dependency_type: DependencyType,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct BondDe {
    source_id: String,
    target_id: String,
    dependency_type: DependencyType,
    created_at: DateTime<Utc>,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

impl TryFrom<BondDe> for Bond {
    type Error = BondValidationError;

    fn try_from(value: BondDe) -> Result<Self, Self::Error> {
        let bond = Self {
            source_id: value.source_id,
            target_id: value.target_id,
            dependency_type: value.dependency_type,
            created_at: value.created_at,
            metadata: value.metadata,
        };
        bond.validate()?;
        Ok(bond)
    }
}

impl Bond {
    /// Creates a new bond stamped with the current instant.
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        dependency_type: DependencyType,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            dependency_type,
            created_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// Creates and validates a new bond.
    pub fn try_new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        dependency_type: DependencyType,
    ) -> Result<Self, BondValidationError> {
        let bond = Self::new(source_id, target_id, dependency_type);
        bond.validate()?;
        Ok(bond)
    }

    /// Validates endpoint ids and the self-reference invariant.
    pub fn validate(&self) -> Result<(), BondValidationError> {
        if !valid_atom_id(&self.source_id) {
            return Err(BondValidationError::InvalidSourceId(self.source_id.clone()));
        }
        if !valid_atom_id(&self.target_id) {
            return Err(BondValidationError::InvalidTargetId(self.target_id.clone()));
        }
        if self.source_id == self.target_id {
            return Err(BondValidationError::SelfReference(self.source_id.clone()));
        }
        Ok(())
    }
}
