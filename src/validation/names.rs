//! # Name Validation
//!
//! Validates Key Vault secret names and Grafana service account names.

use anyhow::Result;
use regex::Regex;

use crate::constants::MAX_KEY_VAULT_SECRET_NAME_LEN;

/// Validate an Azure Key Vault secret name
/// Format: letters, digits and hyphens
/// Length: 1-127 characters
pub fn validate_key_vault_secret_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(anyhow::anyhow!("secret name cannot be empty"));
    }

    if name.len() > MAX_KEY_VAULT_SECRET_NAME_LEN {
        return Err(anyhow::anyhow!(
            "exceeds maximum length of {} characters (got {})",
            MAX_KEY_VAULT_SECRET_NAME_LEN,
            name.len()
        ));
    }

    let secret_regex = Regex::new(r"^[0-9a-zA-Z-]+$")
        .map_err(|e| anyhow::anyhow!("Failed to compile regex: {e}"))?;

    if !secret_regex.is_match(name) {
        return Err(anyhow::anyhow!(
            "must contain only alphanumeric characters and hyphens"
        ));
    }

    Ok(())
}

/// Validate a Grafana service account name
/// Token names are derived from it, so it must stay printable and unambiguous
pub fn validate_service_account_name(name: &str) -> Result<()> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(anyhow::anyhow!("service account name cannot be empty"));
    }

    if trimmed.len() > 190 {
        return Err(anyhow::anyhow!(
            "service account name '{trimmed}' exceeds maximum length of 190 characters"
        ));
    }

    let account_regex = Regex::new(r"^[a-zA-Z0-9._-]+$")
        .map_err(|e| anyhow::anyhow!("Failed to compile regex: {e}"))?;

    if !account_regex.is_match(trimmed) {
        return Err(anyhow::anyhow!(
            "service account name '{trimmed}' must contain only alphanumeric characters, dots, hyphens and underscores"
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_key_vault_names() {
        for name in ["grafana-sa-token", "GrafanaToken1", "a"] {
            assert!(validate_key_vault_secret_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_key_vault_names() {
        let too_long = "a".repeat(128);
        for name in ["", "my_secret", "my.secret", "space here", too_long.as_str()] {
            assert!(validate_key_vault_secret_name(name).is_err(), "{name} should be invalid");
        }
    }

    #[test]
    fn test_service_account_names() {
        assert!(validate_service_account_name("grafana-prod-automation").is_ok());
        assert!(validate_service_account_name("ci.bot_1").is_ok());
        assert!(validate_service_account_name("").is_err());
        assert!(validate_service_account_name("has space").is_err());
        assert!(validate_service_account_name("semi;colon").is_err());
    }
}
