//! # Types
//!
//! Inputs and outputs of a reconciliation run.

use std::fmt;
use std::time::Duration;

use crate::constants::{DEFAULT_TOKEN_NAME_SECRET_NAME, DEFAULT_TOKEN_SECRET_NAME};
use crate::model::SecretValue;

/// Behaviour switches for one run
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(
    clippy::struct_excessive_bools,
    reason = "Each flag is an independent operator switch"
)]
pub struct ReconcileOptions {
    /// Always create a new token
    pub rotate: bool,
    /// Never create; hand back the stored value while an active token exists
    pub reuse_only: bool,
    /// Keep every active token instead of pruning down to one
    pub allow_multiple_active: bool,
    /// Prune pre-existing extra active tokens even when no token is created
    pub cleanup_all_others: bool,
    /// Repoint a stored name that no longer matches any active token
    pub fix_name_mismatch: bool,
    /// Create a token when a value is stored but nothing active remains
    pub stale_recreate: bool,
    /// Read and decide, log every mutation instead of performing it
    pub dry_run: bool,
    /// Lifetime of newly created tokens
    pub token_ttl: Duration,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            rotate: false,
            reuse_only: false,
            allow_multiple_active: false,
            cleanup_all_others: true,
            fix_name_mismatch: true,
            stale_recreate: true,
            dry_run: false,
            token_ttl: Duration::from_secs(90 * 86_400),
        }
    }
}

/// Secret-store keys of the persisted credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretNames {
    /// Holds the token value
    pub value: String,
    /// Holds the token name
    pub name: String,
}

impl Default for SecretNames {
    fn default() -> Self {
        Self {
            value: DEFAULT_TOKEN_SECRET_NAME.to_string(),
            name: DEFAULT_TOKEN_NAME_SECRET_NAME.to_string(),
        }
    }
}

/// What the run ended up doing with the credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStatus {
    /// A new token was created and persisted
    Created,
    /// The stored value was handed back and its name references an active token
    Reused,
    /// The stored value was handed back but could not be linked to an active token
    NoOp,
}

impl ReconcileStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileStatus::Created => "CREATED",
            ReconcileStatus::Reused => "REUSED",
            ReconcileStatus::NoOp => "NO_OP",
        }
    }
}

impl fmt::Display for ReconcileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutations performed (or, in dry-run, planned) during a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileActions {
    pub account_created: bool,
    pub role_updated: bool,
    pub expired_deleted: usize,
    pub pruned: usize,
    pub name_repaired: bool,
    pub token_created: bool,
    pub secrets_written: usize,
}

impl ReconcileActions {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub status: ReconcileStatus,
    /// Name of the token the credential belongs to, when known
    pub token_name: Option<String>,
    /// Always present outside dry-run. A dry-run that would create a token has no value to return.
    pub value: Option<SecretValue>,
    pub actions: ReconcileActions,
    pub dry_run: bool,
}
