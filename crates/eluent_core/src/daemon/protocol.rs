//! Wire shapes for daemon claim/ledger commands.
//!
//! # Responsibility
//! - Define request payloads, the response envelope, and error codes.
//!
//! # Invariants
//! - Success serializes as `{ok: true, data}`; failure as
//!   `{error: {code, message}, data?}`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;

/// Wire error codes.
pub const ERR_INVALID_REQUEST: &str = "INVALID_REQUEST";
pub const ERR_INVALID_STATE: &str = "INVALID_STATE";
pub const ERR_CLAIM_CONFLICT: &str = "CLAIM_CONFLICT";
pub const ERR_MAX_RETRIES: &str = "MAX_RETRIES";
pub const ERR_CLAIM_FAILED: &str = "CLAIM_FAILED";
pub const ERR_LEDGER_NOT_CONFIGURED: &str = "LEDGER_NOT_CONFIGURED";
pub const ERR_LEDGER_NOT_SETUP: &str = "LEDGER_NOT_SETUP";
pub const ERR_SETUP_FAILED: &str = "SETUP_FAILED";
pub const ERR_PULL_FAILED: &str = "PULL_FAILED";
pub const ERR_PUSH_FAILED: &str = "PUSH_FAILED";
pub const ERR_RESYNC_FAILED: &str = "RESYNC_FAILED";

/// `claim` request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub repo_path: PathBuf,
    pub atom_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Skip the ledger and apply the claim locally.
    #[serde(default)]
    pub offline: bool,
    /// Overwrite an existing claim by another agent.
    #[serde(default)]
    pub force: bool,
}

/// `ledger_sync` request payload. `action` stays a raw string so unknown
/// values map to `INVALID_REQUEST` instead of a parse failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSyncRequest {
    pub repo_path: PathBuf,
    pub action: String,
}

/// Error body carried by failure responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Handler-level response; the socket layer wraps it with the request id.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerResponse {
    Ok { data: Value },
    Err { error: ErrorBody, data: Option<Value> },
}

impl HandlerResponse {
    pub fn ok(data: Value) -> Self {
        Self::Ok { data }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Err {
            error: ErrorBody {
                code: code.to_string(),
                message: message.into(),
            },
            data: None,
        }
    }

    pub fn error_with_data(code: &str, message: impl Into<String>, data: Value) -> Self {
        Self::Err {
            error: ErrorBody {
                code: code.to_string(),
                message: message.into(),
            },
            data: Some(data),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    /// Error code of a failure response.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Ok { .. } => None,
            Self::Err { error, .. } => Some(error.code.as_str()),
        }
    }

    /// Wire shape without the request id.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Ok { data } => json!({ "ok": true, "data": data }),
            Self::Err { error, data } => match data {
                Some(data) => json!({
                    "error": { "code": error.code, "message": error.message },
                    "data": data,
                }),
                None => json!({
                    "error": { "code": error.code, "message": error.message },
                }),
            },
        }
    }
}
