//! Distributed claim protocol over a dedicated git branch.
//!
//! # Responsibility
//! - Persist per-repo sync state and queued offline claims.
//! - Coordinate exclusive-work claims with optimistic retry against the
//!   remote ledger.
//!
//! # Invariants
//! - For any single atom, claims are linearized by the sequence of
//!   accepted commits on the ledger branch.

pub mod state;
pub mod syncer;
