//! # Azure Key Vault Secret Store
//!
//! Persists the token value and token name as two Key Vault secrets.
//!
//! Writes compare first: setting a secret to the value it already holds would
//! only mint a new Key Vault version.

use crate::observability::metrics;
use crate::provider::SecretStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use azure_core::credentials::TokenCredential;
use azure_security_keyvault_secrets::{models::SetSecretParameters, SecretClient};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, Instrument};

/// Azure Key Vault backed [`SecretStore`]
pub struct KeyVaultStore {
    client: SecretClient,
    vault_url: String,
}

impl std::fmt::Debug for KeyVaultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVaultStore")
            .field("vault_url", &self.vault_url)
            .finish_non_exhaustive()
    }
}

/// `my-vault` becomes `https://my-vault.vault.azure.net/`; full URLs pass through
#[must_use]
pub fn vault_url_for(vault_name: &str) -> String {
    if vault_name.starts_with("https://") {
        if vault_name.ends_with('/') {
            vault_name.to_string()
        } else {
            format!("{vault_name}/")
        }
    } else {
        format!("https://{vault_name}.vault.azure.net/")
    }
}

impl KeyVaultStore {
    /// Create a Key Vault client
    ///
    /// `AZURE_KEY_VAULT_ENDPOINT` overrides the derived URL (sovereign clouds, test doubles).
    ///
    /// # Errors
    /// Returns an error if Azure client initialization fails
    pub fn new(vault_name: &str, credential: Arc<dyn TokenCredential>) -> Result<Self> {
        let vault_url = std::env::var("AZURE_KEY_VAULT_ENDPOINT")
            .map_or_else(|_| vault_url_for(vault_name), |endpoint| vault_url_for(&endpoint));

        let client = SecretClient::new(&vault_url, credential, None)
            .context("Failed to create Azure Key Vault SecretClient")?;

        Ok(Self { client, vault_url })
    }

    fn vault_name(&self) -> &str {
        self.vault_url
            .strip_prefix("https://")
            .and_then(|s| s.strip_suffix(".vault.azure.net/"))
            .unwrap_or("unknown")
    }
}

#[async_trait]
impl SecretStore for KeyVaultStore {
    async fn get_secret(&self, secret_name: &str) -> Result<Option<String>> {
        let span = tracing::debug_span!(
            "azure.keyvault.secret.get",
            secret.name = secret_name,
            vault.name = self.vault_name()
        );
        let start = Instant::now();

        async move {
            match self.client.get_secret(secret_name, None).await {
                Ok(response) => {
                    use azure_security_keyvault_secrets::models::Secret;
                    let secret = serde_json::from_slice::<Secret>(&response.into_body())
                        .context("Failed to deserialize Azure secret response");
                    metrics::record_backend_operation(
                        "keyvault",
                        "get",
                        start.elapsed().as_secs_f64(),
                    );
                    match secret {
                        Ok(secret) => Ok(secret.value),
                        Err(e) => {
                            metrics::increment_backend_errors("keyvault");
                            Err(e)
                        }
                    }
                }
                Err(e) => {
                    let error_msg = e.to_string();
                    if error_msg.contains("SecretNotFound")
                        || error_msg.contains("404")
                        || error_msg.contains("not found")
                    {
                        debug!("Key Vault secret {} not found", secret_name);
                        metrics::record_backend_operation(
                            "keyvault",
                            "get",
                            start.elapsed().as_secs_f64(),
                        );
                        Ok(None)
                    } else {
                        metrics::increment_backend_errors("keyvault");
                        Err(anyhow::anyhow!(
                            "Failed to get Azure secret {secret_name}: {e}"
                        ))
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn set_secret(
        &self,
        secret_name: &str,
        secret_value: &str,
        _sensitive: bool,
    ) -> Result<bool> {
        let span = info_span!(
            "azure.keyvault.secret.set",
            secret.name = secret_name,
            vault.name = self.vault_name()
        );
        let start = Instant::now();

        async move {
            let current_value = self.get_secret(secret_name).await?;

            let operation_type = match current_value {
                Some(current) if current == secret_value => {
                    debug!("Azure secret {} unchanged, skipping update", secret_name);
                    metrics::record_backend_operation(
                        "keyvault",
                        "no_change",
                        start.elapsed().as_secs_f64(),
                    );
                    return Ok(false);
                }
                Some(_) => "update",
                None => "create",
            };

            // Key Vault creates a new version on every set
            info!(
                "Writing Azure secret: vault={}, secret={}, operation={}",
                self.vault_name(),
                secret_name,
                operation_type
            );
            let parameters = SetSecretParameters {
                value: Some(secret_value.to_string()),
                ..Default::default()
            };

            match self
                .client
                .set_secret(secret_name, parameters.try_into()?, None)
                .await
            {
                Ok(_) => {
                    metrics::record_backend_operation(
                        "keyvault",
                        operation_type,
                        start.elapsed().as_secs_f64(),
                    );
                    Ok(true)
                }
                Err(e) => {
                    metrics::increment_backend_errors("keyvault");
                    Err(anyhow::anyhow!(
                        "Failed to create/update Azure secret {secret_name}: {e}"
                    ))
                }
            }
        }
        .instrument(span)
        .await
    }
}
