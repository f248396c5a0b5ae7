//! # Grafana Service Account Client
//!
//! Native REST client for the Grafana HTTP API service-account endpoints.
//!
//! Azure Managed Grafana accepts Entra ID bearer tokens issued for its
//! application audience; self-hosted Grafana (and local testing) can use a
//! static API token instead.
//!
//! References:
//! - [Grafana Service account HTTP API](https://grafana.com/docs/grafana/latest/developers/http_api/serviceaccount/)

pub mod endpoint;
mod responses;

use crate::constants::AZURE_MANAGED_GRAFANA_SCOPE;
use crate::model::{SecretValue, ServiceAccount, Token};
use crate::observability::metrics;
use crate::provider::{CreatedToken, GrafanaAccountApi};
use anyhow::{Context, Result};
use async_trait::async_trait;
use azure_core::credentials::{TokenCredential, TokenRequestOptions};
use reqwest::{Client, Method, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, Instrument};

use self::responses::{
    CreateServiceAccountRequest, CreateTokenRequest, CreateTokenResponse, GrafanaErrorResponse,
    ServiceAccountResponse, ServiceAccountSearchResponse, TokenResponse,
    UpdateServiceAccountRequest,
};

/// How requests to Grafana are authenticated
#[derive(Clone)]
pub enum GrafanaAuth {
    /// Entra ID token for the Azure Managed Grafana audience
    Entra(Arc<dyn TokenCredential>),
    /// Static Grafana API token or service-account token
    Static(SecretValue),
}

impl std::fmt::Debug for GrafanaAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GrafanaAuth::Entra(_) => f.write_str("GrafanaAuth::Entra"),
            GrafanaAuth::Static(_) => f.write_str("GrafanaAuth::Static([REDACTED])"),
        }
    }
}

/// Grafana REST client
pub struct GrafanaClient {
    http_client: Client,
    base_url: String,
    auth: GrafanaAuth,
}

impl std::fmt::Debug for GrafanaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrafanaClient")
            .field("base_url", &self.base_url)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl GrafanaClient {
    /// Create a client for the Grafana instance at `base_url`
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built
    pub fn new(base_url: &str, auth: GrafanaAuth) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        info!("Initializing Grafana client for {}", base_url);

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    async fn bearer_token(&self) -> Result<String> {
        match &self.auth {
            GrafanaAuth::Static(token) => Ok(token.expose().to_string()),
            GrafanaAuth::Entra(credential) => {
                let scope = &[AZURE_MANAGED_GRAFANA_SCOPE];
                let options = Some(TokenRequestOptions::default());
                let token_response = credential
                    .get_token(scope, options)
                    .await
                    .context("Failed to get Entra ID access token for Azure Managed Grafana")?;
                Ok(token_response.token.secret().to_string())
            }
        }
    }

    /// Build an authenticated request
    async fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder> {
        let url = format!("{}{}", self.base_url, path);
        let token = self.bearer_token().await?;

        Ok(self
            .http_client
            .request(method, &url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Accept", "application/json"))
    }

    /// Turn a non-success response into an error carrying Grafana's message
    async fn error_from_response(response: reqwest::Response) -> anyhow::Error {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GrafanaErrorResponse>(&error_text)
            .ok()
            .and_then(|e| e.message)
            .unwrap_or(error_text);
        anyhow::anyhow!("Grafana API error: HTTP {status} - {message}")
    }

    fn record(operation: &str, start: Instant, success: bool) {
        metrics::record_backend_operation("grafana", operation, start.elapsed().as_secs_f64());
        if !success {
            metrics::increment_backend_errors("grafana");
        }
    }
}

#[async_trait]
impl GrafanaAccountApi for GrafanaClient {
    async fn find_service_account(&self, name: &str) -> Result<Option<ServiceAccount>> {
        let span = tracing::debug_span!("grafana.service_account.find", service_account = name);
        let start = Instant::now();

        async move {
            let response = self
                .request(Method::GET, "/api/serviceaccounts/search")
                .await?
                .query(&[("query", name), ("perpage", "100")])
                .send()
                .await
                .context("Failed to search Grafana service accounts")?;

            if !response.status().is_success() {
                Self::record("find_service_account", start, false);
                return Err(Self::error_from_response(response)
                    .await
                    .context(format!("Failed to search for service account '{name}'")));
            }

            let body: ServiceAccountSearchResponse = response
                .json()
                .await
                .context("Failed to parse service account search response")?;

            Self::record("find_service_account", start, true);

            // Search is a substring match; only an exact name counts
            Ok(body
                .service_accounts
                .into_iter()
                .find(|sa| sa.name == name)
                .map(ServiceAccount::from))
        }
        .instrument(span)
        .await
    }

    async fn create_service_account(&self, name: &str, role: &str) -> Result<ServiceAccount> {
        let span = info_span!(
            "grafana.service_account.create",
            service_account = name,
            role = role
        );
        let start = Instant::now();

        async move {
            info!("Creating Grafana service account '{}' with role {}", name, role);

            let response = self
                .request(Method::POST, "/api/serviceaccounts")
                .await?
                .json(&CreateServiceAccountRequest {
                    name,
                    role,
                    is_disabled: false,
                })
                .send()
                .await
                .context("Failed to create Grafana service account")?;

            if !response.status().is_success() {
                Self::record("create_service_account", start, false);
                return Err(Self::error_from_response(response)
                    .await
                    .context(format!("Failed to create service account '{name}'")));
            }

            let account: ServiceAccountResponse = response
                .json()
                .await
                .context("Failed to parse service account creation response")?;

            Self::record("create_service_account", start, true);
            let mut account = ServiceAccount::from(account);
            if account.role.is_empty() {
                account.role = role.to_string();
            }
            Ok(account)
        }
        .instrument(span)
        .await
    }

    async fn update_service_account_role(
        &self,
        account: &ServiceAccount,
        role: &str,
    ) -> Result<()> {
        let span = info_span!(
            "grafana.service_account.update_role",
            service_account = %account.name,
            role = role
        );
        let start = Instant::now();

        async move {
            info!(
                "Updating role of service account '{}' from {} to {}",
                account.name, account.role, role
            );

            let response = self
                .request(Method::PATCH, &format!("/api/serviceaccounts/{}", account.id))
                .await?
                .json(&UpdateServiceAccountRequest { role })
                .send()
                .await
                .context("Failed to update Grafana service account")?;

            if !response.status().is_success() {
                Self::record("update_service_account_role", start, false);
                return Err(Self::error_from_response(response).await.context(format!(
                    "Failed to update role of service account '{}'",
                    account.name
                )));
            }

            Self::record("update_service_account_role", start, true);
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn list_tokens(&self, account: &ServiceAccount) -> Result<Vec<Token>> {
        let span = tracing::debug_span!("grafana.token.list", service_account = %account.name);
        let start = Instant::now();

        async move {
            let response = self
                .request(
                    Method::GET,
                    &format!("/api/serviceaccounts/{}/tokens", account.id),
                )
                .await?
                .send()
                .await
                .context("Failed to list Grafana service account tokens")?;

            if !response.status().is_success() {
                Self::record("list_tokens", start, false);
                return Err(Self::error_from_response(response).await.context(format!(
                    "Failed to list tokens of service account '{}'",
                    account.name
                )));
            }

            let tokens: Vec<TokenResponse> = response
                .json()
                .await
                .context("Failed to parse token list response")?;

            Self::record("list_tokens", start, true);
            debug!(
                "Service account '{}' has {} token(s)",
                account.name,
                tokens.len()
            );
            Ok(tokens.into_iter().map(Token::from).collect())
        }
        .instrument(span)
        .await
    }

    async fn create_token(
        &self,
        account: &ServiceAccount,
        name: &str,
        ttl: Duration,
    ) -> Result<CreatedToken> {
        let span = info_span!(
            "grafana.token.create",
            service_account = %account.name,
            token_name = name
        );
        let start = Instant::now();

        async move {
            let response = self
                .request(
                    Method::POST,
                    &format!("/api/serviceaccounts/{}/tokens", account.id),
                )
                .await?
                .json(&CreateTokenRequest {
                    name,
                    seconds_to_live: ttl.as_secs(),
                })
                .send()
                .await
                .context("Failed to create Grafana service account token")?;

            if !response.status().is_success() {
                Self::record("create_token", start, false);
                return Err(Self::error_from_response(response)
                    .await
                    .context(format!("Failed to create token '{name}'")));
            }

            let created: CreateTokenResponse = response
                .json()
                .await
                .context("Failed to parse token creation response")?;

            Self::record("create_token", start, true);
            Ok(created.into_created(name))
        }
        .instrument(span)
        .await
    }

    async fn delete_token(&self, account: &ServiceAccount, token: &Token) -> Result<()> {
        let span = info_span!(
            "grafana.token.delete",
            service_account = %account.name,
            token_name = %token.name
        );
        let start = Instant::now();

        async move {
            let response = self
                .request(
                    Method::DELETE,
                    &format!("/api/serviceaccounts/{}/tokens/{}", account.id, token.id),
                )
                .await?
                .send()
                .await
                .context("Failed to delete Grafana service account token")?;

            if response.status() == StatusCode::NOT_FOUND {
                debug!("Token '{}' already deleted", token.name);
                Self::record("delete_token", start, true);
                return Ok(());
            }

            if !response.status().is_success() {
                Self::record("delete_token", start, false);
                return Err(Self::error_from_response(response)
                    .await
                    .context(format!("Failed to delete token '{}'", token.name)));
            }

            Self::record("delete_token", start, true);
            Ok(())
        }
        .instrument(span)
        .await
    }
}
