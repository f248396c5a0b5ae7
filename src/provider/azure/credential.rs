//! # Azure Credentials
//!
//! Builds the Entra ID `TokenCredential` shared by the Grafana client, the
//! Resource Manager endpoint lookup and Key Vault.

use anyhow::{Context, Result};
use azure_core::credentials::TokenCredential;
use azure_identity::{AzureCliCredential, ManagedIdentityCredential, WorkloadIdentityCredential};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Supported Entra ID authentication methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AzureAuthMethod {
    /// Reuse the signed-in Azure CLI session (pipelines with `AzureCLI@2`, local runs)
    #[default]
    AzureCli,
    /// Managed identity of the host (AKS, VM, App Service)
    ManagedIdentity,
    /// Federated workload identity (`AZURE_FEDERATED_TOKEN_FILE`)
    WorkloadIdentity,
}

impl FromStr for AzureAuthMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "cli" | "azure-cli" | "azurecli" => Ok(Self::AzureCli),
            "managed-identity" | "managedidentity" | "msi" => Ok(Self::ManagedIdentity),
            "workload-identity" | "workloadidentity" => Ok(Self::WorkloadIdentity),
            other => Err(anyhow::anyhow!(
                "Unknown Azure auth method '{other}'. Expected: cli, managed-identity or workload-identity"
            )),
        }
    }
}

/// Build the credential for `method`
///
/// # Errors
/// Returns an error if the Azure SDK rejects the credential configuration
pub fn build_credential(
    method: AzureAuthMethod,
    client_id: Option<&str>,
) -> Result<Arc<dyn TokenCredential>> {
    let credential: Arc<dyn TokenCredential> = match method {
        AzureAuthMethod::AzureCli => {
            info!("Using Azure CLI authentication");
            AzureCliCredential::new(None).context("Failed to create AzureCliCredential")?
        }
        AzureAuthMethod::ManagedIdentity => {
            info!("Using Managed Identity authentication");
            ManagedIdentityCredential::new(None)
                .context("Failed to create ManagedIdentityCredential")?
        }
        AzureAuthMethod::WorkloadIdentity => {
            info!(
                "Using Azure Workload Identity authentication with client ID: {}",
                client_id.unwrap_or("<from environment>")
            );
            let options = azure_identity::WorkloadIdentityCredentialOptions {
                client_id: client_id.map(str::to_string),
                ..Default::default()
            };
            WorkloadIdentityCredential::new(Some(options))
                .context("Failed to create WorkloadIdentityCredential")?
        }
    };

    Ok(credential)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_method_parsing() {
        assert_eq!("cli".parse::<AzureAuthMethod>().unwrap(), AzureAuthMethod::AzureCli);
        assert_eq!(
            "Managed-Identity".parse::<AzureAuthMethod>().unwrap(),
            AzureAuthMethod::ManagedIdentity
        );
        assert_eq!(
            "workload-identity".parse::<AzureAuthMethod>().unwrap(),
            AzureAuthMethod::WorkloadIdentity
        );
        assert!("service-principal".parse::<AzureAuthMethod>().is_err());
    }
}
