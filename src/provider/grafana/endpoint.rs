//! # Grafana Endpoint Resolution
//!
//! Azure Managed Grafana URLs carry a generated suffix
//! (`https://<name>-<hash>.<region>.grafana.azure.com`), so the URL cannot be
//! derived from the instance name alone. It is either configured explicitly
//! or read from the `Microsoft.Dashboard/grafana` resource in Azure Resource
//! Manager.

use crate::constants::{
    AZURE_GRAFANA_API_VERSION, AZURE_RESOURCE_MANAGER_ENDPOINT, AZURE_RESOURCE_MANAGER_SCOPE,
};
use anyhow::{Context, Result};
use azure_core::credentials::{TokenCredential, TokenRequestOptions};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

/// Coordinates of a Managed Grafana resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrafanaResourceRef {
    pub subscription_id: String,
    pub resource_group: String,
    pub instance_name: String,
}

impl GrafanaResourceRef {
    /// ARM path of the resource, with api-version
    #[must_use]
    pub fn resource_path(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Dashboard/grafana/{}?api-version={}",
            self.subscription_id, self.resource_group, self.instance_name, AZURE_GRAFANA_API_VERSION
        )
    }
}

#[derive(Debug, Deserialize)]
struct GrafanaResource {
    properties: GrafanaResourceProperties,
}

#[derive(Debug, Deserialize)]
struct GrafanaResourceProperties {
    #[serde(default)]
    endpoint: Option<String>,
}

/// Normalise a configured endpoint: add a scheme when missing, drop trailing slashes
#[must_use]
pub fn normalize_endpoint(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

/// Read `properties.endpoint` of the Managed Grafana resource from ARM
///
/// # Errors
/// Returns an error if the token request, the ARM call, or parsing fails, or
/// if the resource reports no endpoint.
pub async fn lookup_endpoint(
    resource: &GrafanaResourceRef,
    credential: &Arc<dyn TokenCredential>,
) -> Result<String> {
    lookup_endpoint_at(AZURE_RESOURCE_MANAGER_ENDPOINT, resource, credential).await
}

pub(crate) async fn lookup_endpoint_at(
    arm_base_url: &str,
    resource: &GrafanaResourceRef,
    credential: &Arc<dyn TokenCredential>,
) -> Result<String> {
    let scope = &[AZURE_RESOURCE_MANAGER_SCOPE];
    let token = credential
        .get_token(scope, Some(TokenRequestOptions::default()))
        .await
        .context("Failed to get Azure Resource Manager access token")?;

    let url = format!(
        "{}{}",
        arm_base_url.trim_end_matches('/'),
        resource.resource_path()
    );

    let http_client = Client::builder()
        .build()
        .context("Failed to create HTTP client")?;

    let response = http_client
        .get(&url)
        .header("Authorization", format!("Bearer {}", token.token.secret()))
        .send()
        .await
        .context("Failed to query Azure Resource Manager for the Grafana instance")?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        return Err(anyhow::anyhow!(
            "Failed to read Grafana instance '{}' in resource group '{}': HTTP {} - {}",
            resource.instance_name,
            resource.resource_group,
            status,
            error_text
        ));
    }

    let body: GrafanaResource = response
        .json()
        .await
        .context("Failed to parse Grafana resource response")?;

    let endpoint = parse_endpoint(body, &resource.instance_name)?;
    info!(
        "Resolved Grafana instance '{}' to {}",
        resource.instance_name, endpoint
    );
    Ok(endpoint)
}

fn parse_endpoint(body: GrafanaResource, instance_name: &str) -> Result<String> {
    body.properties
        .endpoint
        .filter(|e| !e.trim().is_empty())
        .map(|e| normalize_endpoint(&e))
        .ok_or_else(|| anyhow::anyhow!("Grafana instance '{instance_name}' reports no endpoint"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(
            normalize_endpoint("my-grafana-abc.eus.grafana.azure.com/"),
            "https://my-grafana-abc.eus.grafana.azure.com"
        );
        assert_eq!(
            normalize_endpoint("http://localhost:3000"),
            "http://localhost:3000"
        );
    }

    #[test]
    fn test_resource_path() {
        let resource = GrafanaResourceRef {
            subscription_id: "sub".to_string(),
            resource_group: "rg".to_string(),
            instance_name: "graf".to_string(),
        };
        assert_eq!(
            resource.resource_path(),
            "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Dashboard/grafana/graf?api-version=2023-09-01"
        );
    }

    #[test]
    fn test_parse_endpoint() {
        let body: GrafanaResource = serde_json::from_value(json!({
            "name": "graf",
            "properties": { "endpoint": "https://graf-x.weu.grafana.azure.com" }
        }))
        .unwrap();
        assert_eq!(
            parse_endpoint(body, "graf").unwrap(),
            "https://graf-x.weu.grafana.azure.com"
        );

        let missing: GrafanaResource =
            serde_json::from_value(json!({ "properties": {} })).unwrap();
        assert!(parse_endpoint(missing, "graf").is_err());
    }
}
