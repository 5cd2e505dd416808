//! Graceful aging of closed work items.
//!
//! # Responsibility
//! - Summarize, compact, and restore old atoms in two tiers.
//!
//! # Invariants
//! - Compaction tier advances monotonically {0 -> 1 -> 2}; restoration
//!   resets it to 0.

pub mod compactor;
pub mod restore;
pub mod summarizer;
