//! # Errors
//!
//! Error taxonomy for a reconciliation run.
//!
//! Backends report failures as `anyhow::Error` with context attached; the
//! reconciler lifts them into [`TokenManagerError::Backend`]. Cleanup failures
//! never reach this type: they are logged and swallowed where they happen.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenManagerError {
    /// Missing or malformed configuration, detected before any mutation
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Secret name rejected by the secret store naming rules
    #[error("Invalid secret name '{name}': {reason}")]
    InvalidSecretName { name: String, reason: String },

    /// Reuse-only run with nothing to reuse
    #[error(
        "No credential available for service account '{service_account}': \
         no active token with a stored value exists and reuse-only mode forbids creating one \
         (seed once with rotate enabled)"
    )]
    NoCredentialAvailable { service_account: String },

    /// The create call returned no extractable secret value
    #[error("Token creation failed for '{token_name}': {reason}")]
    TokenCreationFailed { token_name: String, reason: String },

    /// Fatal backend failure (listing tokens, creating the account, persisting secrets)
    #[error("Backend call failed: {0:#}")]
    Backend(#[from] anyhow::Error),
}

impl TokenManagerError {
    /// Errors raised before any backend mutation could have happened
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            TokenManagerError::Config(_) | TokenManagerError::InvalidSecretName { .. }
        )
    }
}

pub type Result<T, E = TokenManagerError> = std::result::Result<T, E>;
