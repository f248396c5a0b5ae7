//! # Provider Modules
//!
//! Backend seams of the reconciler.
//!
//! - `GrafanaAccountApi` lists and mutates service accounts and their tokens
//! - `SecretStore` holds the persisted token value and token name
//!
//! Decision logic only ever talks to these traits; the HTTP details and field
//! name quirks of each backend stay inside the implementations.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::model::{SecretValue, ServiceAccount, Token};

/// Result of a token creation call
#[derive(Debug, Clone)]
pub struct CreatedToken {
    pub id: String,
    pub name: String,
    /// The bearer value. `None` when the response carried no recognisable secret field.
    pub secret: Option<SecretValue>,
}

/// Grafana service-account API
#[async_trait]
pub trait GrafanaAccountApi: Send + Sync {
    /// Look up a service account by exact name
    async fn find_service_account(&self, name: &str) -> Result<Option<ServiceAccount>>;

    /// Create a service account with the given role
    async fn create_service_account(&self, name: &str, role: &str) -> Result<ServiceAccount>;

    /// Change the role of an existing service account
    async fn update_service_account_role(&self, account: &ServiceAccount, role: &str)
        -> Result<()>;

    /// List token metadata for an account
    async fn list_tokens(&self, account: &ServiceAccount) -> Result<Vec<Token>>;

    /// Create a token. The returned secret is the only time the value is visible.
    async fn create_token(
        &self,
        account: &ServiceAccount,
        name: &str,
        ttl: Duration,
    ) -> Result<CreatedToken>;

    /// Delete a token. Deleting a token that is already gone succeeds.
    async fn delete_token(&self, account: &ServiceAccount, token: &Token) -> Result<()>;
}

/// Key/value secret store for the persisted credential
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Get the latest secret value
    async fn get_secret(&self, secret_name: &str) -> Result<Option<String>>;

    /// Create or update a secret
    /// Returns true if the secret was written, false if it already held this value
    async fn set_secret(&self, secret_name: &str, secret_value: &str, sensitive: bool)
        -> Result<bool>;

    /// Expose the current value to downstream consumers, whether or not it changed.
    /// Stores that are read directly by their consumers have nothing to do.
    async fn publish(&self, _secret_name: &str, _secret_value: &str, _sensitive: bool) -> Result<()> {
        Ok(())
    }
}

pub mod azure;
pub mod grafana;
pub mod pipeline;
