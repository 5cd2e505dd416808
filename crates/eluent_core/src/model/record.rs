//! Tagged JSONL record envelope.
//!
//! # Responsibility
//! - Dispatch data-file lines on their `_type` tag into typed records.
//! - Preserve unknown record types verbatim across load/rewrite cycles.
//!
//! # Invariants
//! - `to_json_line(from_json_line(line))` is semantically lossless for
//!   unknown `_type` values.

use crate::model::atom::Atom;
use crate::model::bond::Bond;
use crate::model::comment::Comment;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// `_type` tag for atom records.
pub const TYPE_ATOM: &str = "atom";
/// `_type` tag for bond records.
pub const TYPE_BOND: &str = "bond";
/// `_type` tag for comment records.
pub const TYPE_COMMENT: &str = "comment";

pub type RecordResult<T> = Result<T, RecordError>;

/// Record envelope parse/serialize error.
#[derive(Debug)]
pub enum RecordError {
    /// Line is not a JSON object.
    NotAnObject,
    /// Object has no string `_type` field.
    MissingType,
    /// Known `_type` whose payload fails typed deserialization.
    InvalidPayload {
        record_type: &'static str,
        message: String,
    },
    /// JSON syntax or serialization failure.
    Json(serde_json::Error),
}

impl Display for RecordError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "record line is not a JSON object"),
            Self::MissingType => write!(f, "record line has no `_type` field"),
            Self::InvalidPayload {
                record_type,
                message,
            } => write!(f, "invalid `{record_type}` record: {message}"),
            Self::Json(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RecordError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for RecordError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// One JSONL data-file record.
///
/// `Unknown` keeps the raw object for `_type` values this crate does not
/// model, so foreign record types survive a load -> rewrite round-trip.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Atom(Atom),
    Bond(Bond),
    Comment(Comment),
    Unknown(Value),
}

impl Record {
    /// Parses one JSONL line into a typed record.
    pub fn from_json_line(line: &str) -> RecordResult<Self> {
        let value: Value = serde_json::from_str(line)?;
        Self::from_value(value)
    }

    /// Dispatches a JSON object on its `_type` tag.
    pub fn from_value(value: Value) -> RecordResult<Self> {
        let object = value.as_object().ok_or(RecordError::NotAnObject)?;
        let record_type = object
            .get("_type")
            .and_then(Value::as_str)
            .ok_or(RecordError::MissingType)?;

        match record_type {
            TYPE_ATOM => serde_json::from_value::<Atom>(value.clone())
                .map(Record::Atom)
                .map_err(|err| RecordError::InvalidPayload {
                    record_type: TYPE_ATOM,
                    message: err.to_string(),
                }),
            TYPE_BOND => serde_json::from_value::<Bond>(value.clone())
                .map(Record::Bond)
                .map_err(|err| RecordError::InvalidPayload {
                    record_type: TYPE_BOND,
                    message: err.to_string(),
                }),
            TYPE_COMMENT => serde_json::from_value::<Comment>(value.clone())
                .map(Record::Comment)
                .map_err(|err| RecordError::InvalidPayload {
                    record_type: TYPE_COMMENT,
                    message: err.to_string(),
                }),
            _ => Ok(Record::Unknown(value)),
        }
    }

    /// Serializes this record as a tagged JSON object.
    pub fn to_value(&self) -> RecordResult<Value> {
        match self {
            Self::Atom(atom) => tag_value(serde_json::to_value(atom)?, TYPE_ATOM),
            Self::Bond(bond) => tag_value(serde_json::to_value(bond)?, TYPE_BOND),
            Self::Comment(comment) => tag_value(serde_json::to_value(comment)?, TYPE_COMMENT),
            Self::Unknown(value) => Ok(value.clone()),
        }
    }

    /// Serializes this record as one JSONL line (no trailing newline).
    pub fn to_json_line(&self) -> RecordResult<String> {
        Ok(serde_json::to_string(&self.to_value()?)?)
    }

    /// Last-write-wins supersede key.
    ///
    /// `None` means the record has no identity and is kept as-is (unknown
    /// records without an `id` field).
    pub fn key(&self) -> Option<String> {
        match self {
            Self::Atom(atom) => Some(format!("{TYPE_ATOM}:{}", atom.id)),
            Self::Comment(comment) => Some(format!("{TYPE_COMMENT}:{}", comment.id)),
            Self::Bond(bond) => Some(format!(
                "{TYPE_BOND}:{}>{}:{}",
                bond.source_id,
                bond.target_id,
                bond.dependency_type.as_str()
            )),
            Self::Unknown(value) => {
                let record_type = value.get("_type")?.as_str()?;
                let id = value.get("id")?.as_str()?;
                Some(format!("{record_type}:{id}"))
            }
        }
    }
}

fn tag_value(value: Value, record_type: &str) -> RecordResult<Value> {
    match value {
        Value::Object(mut object) => {
            let mut tagged = Map::new();
            tagged.insert("_type".to_string(), Value::String(record_type.to_string()));
            tagged.append(&mut object);
            Ok(Value::Object(tagged))
        }
        _ => Err(RecordError::NotAnObject),
    }
}
