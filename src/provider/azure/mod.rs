//! # Azure
//!
//! Entra ID credentials and the Key Vault secret store.

pub mod credential;
pub mod key_vault;

pub use credential::{build_credential, AzureAuthMethod};
pub use key_vault::KeyVaultStore;
