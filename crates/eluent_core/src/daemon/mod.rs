//! Daemon-facing command surface.
//!
//! # Responsibility
//! - Expose claim and ledger-sync operations as request/response commands
//!   shared by all client threads.

pub mod handlers;
pub mod protocol;
