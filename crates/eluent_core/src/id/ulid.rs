//! ULID generation and atom-id composition.
//!
//! # Responsibility
//! - Generate and parse 26-char Crockford Base32 ULIDs.
//! - Compose and decompose full atom ids `<repo>-<ulid>[.<child>]*`.
//!
//! # Invariants
//! - The first ULID char is `0..=7` (48-bit timestamp overflow guard).
//! - Decoding reverses encoding exactly; `parse(generate()).time` equals the
//!   generation instant truncated to milliseconds.
//! - Input is case-insensitive; canonical form is upper-case.

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use rand::RngCore;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Total ULID length in characters.
pub const ULID_LEN: usize = 26;
/// Leading characters encoding the millisecond timestamp.
pub const TIMESTAMP_LEN: usize = 10;
/// Trailing characters encoding the random payload.
pub const RANDOMNESS_LEN: usize = 16;

/// Crockford Base32 alphabet. Excludes `I L O U`.
const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const MAX_TIMESTAMP_MS: u64 = (1 << 48) - 1;

static ATOM_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<repo>[a-z][a-z0-9_-]{0,31})-(?P<ulid>[0-7][0-9A-HJKMNP-TV-Za-hjkmnp-tv-z]{25})(?P<children>(?:\.[A-Za-z0-9_-]+)*)$",
    )
    .expect("valid atom id regex")
});

pub type UlidResult<T> = Result<T, UlidError>;

/// Identifier codec error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UlidError {
    /// Wall clock exceeds the 48-bit millisecond range.
    ClockOverflow(u64),
}

impl Display for UlidError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClockOverflow(ms) => {
                write!(f, "timestamp {ms}ms exceeds 48-bit ULID range")
            }
        }
    }
}

impl Error for UlidError {}

/// Decoded view of a valid ULID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUlid {
    /// Unix epoch milliseconds from the leading 10 characters.
    pub timestamp_ms: u64,
    /// Upper-cased trailing 16 characters.
    pub randomness: String,
    /// `timestamp_ms` as a UTC instant.
    pub time: DateTime<Utc>,
}

/// Generates a new upper-case ULID from the wall clock and `OsRng`.
///
/// # Errors
/// - Returns [`UlidError::ClockOverflow`] when the clock exceeds 2^48-1 ms.
pub fn generate_ulid() -> UlidResult<String> {
    let now_ms = Utc::now().timestamp_millis().max(0) as u64;
    generate_ulid_at(now_ms)
}

/// Generates a ULID for an explicit millisecond timestamp.
///
/// Split out so tests can pin the time component.
pub fn generate_ulid_at(timestamp_ms: u64) -> UlidResult<String> {
    if timestamp_ms > MAX_TIMESTAMP_MS {
        return Err(UlidError::ClockOverflow(timestamp_ms));
    }

    let mut random_bytes = [0u8; 10];
    OsRng.fill_bytes(&mut random_bytes);
    let mut randomness: u128 = 0;
    for byte in random_bytes {
        randomness = (randomness << 8) | u128::from(byte);
    }

    let value = (u128::from(timestamp_ms) << 80) | randomness;
    Ok(encode_base32(value))
}

/// Parses a ULID, accepting lower-case input.
///
/// Returns `None` for any malformed input.
pub fn parse_ulid(input: &str) -> Option<ParsedUlid> {
    if input.len() != ULID_LEN {
        return None;
    }

    let canonical = input.to_ascii_uppercase();
    let first = canonical.as_bytes()[0];
    if !(b'0'..=b'7').contains(&first) {
        return None;
    }

    let mut value: u128 = 0;
    for ch in canonical.chars() {
        value = (value << 5) | u128::from(decode_char(ch)?);
    }

    let timestamp_ms = (value >> 80) as u64;
    let time = Utc.timestamp_millis_opt(timestamp_ms as i64).single()?;
    Some(ParsedUlid {
        timestamp_ms,
        randomness: canonical[TIMESTAMP_LEN..].to_string(),
        time,
    })
}

/// Returns whether `input` is a well-formed ULID.
pub fn valid_ulid(input: &str) -> bool {
    parse_ulid(input).is_some()
}

/// Composes a full atom id from repo name and ULID.
pub fn compose_atom_id(repo: &str, ulid: &str) -> String {
    format!("{}-{}", repo.to_ascii_lowercase(), ulid.to_ascii_uppercase())
}

/// Composes a child atom id by appending one dot-separated segment.
pub fn compose_child_id(parent_id: &str, child: &str) -> String {
    format!("{parent_id}.{child}")
}

/// Composes a comment id from its parent atom id and index.
pub fn compose_comment_id(atom_id: &str, index: u32) -> String {
    format!("{atom_id}-c{index}")
}

/// Extracts the repo-name prefix of a full atom id.
pub fn extract_repo_name(id: &str) -> Option<String> {
    ATOM_ID_RE
        .captures(id)
        .map(|caps| caps["repo"].to_string())
}

/// Extracts the canonical upper-case ULID of a full atom id.
pub fn extract_ulid(id: &str) -> Option<String> {
    ATOM_ID_RE
        .captures(id)
        .map(|caps| caps["ulid"].to_ascii_uppercase())
}

/// Extracts the 16-char randomness portion of a full atom id.
pub fn extract_randomness(id: &str) -> Option<String> {
    extract_ulid(id).map(|ulid| ulid[TIMESTAMP_LEN..].to_string())
}

/// Returns whether `id` is a well-formed full atom id, child segments
/// included.
pub fn valid_atom_id(id: &str) -> bool {
    ATOM_ID_RE.is_match(id)
}

fn encode_base32(value: u128) -> String {
    let mut out = String::with_capacity(ULID_LEN);
    for position in (0..ULID_LEN).rev() {
        let index = ((value >> (position * 5)) & 0x1F) as usize;
        out.push(ALPHABET[index] as char);
    }
    out
}

fn decode_char(ch: char) -> Option<u8> {
    ALPHABET
        .iter()
        .position(|&candidate| candidate as char == ch)
        .map(|index| index as u8)
}
