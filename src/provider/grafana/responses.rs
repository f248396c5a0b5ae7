//! # Grafana API Payloads
//!
//! Request bodies and response shapes of the Grafana service-account API.
//!
//! Grafana versions disagree on field names: the created token's secret has
//! been `key`, `token` and `value`; expiry has been `expiration`, `expiresAt`
//! and `expires`. All of that is absorbed here, in one place, so callers only
//! ever see [`Token`] and [`CreatedToken`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{SecretValue, ServiceAccount, Token};
use crate::provider::CreatedToken;

/// Body of `POST /api/serviceaccounts`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateServiceAccountRequest<'a> {
    pub name: &'a str,
    pub role: &'a str,
    pub is_disabled: bool,
}

/// Body of `PATCH /api/serviceaccounts/{id}`
#[derive(Debug, Serialize)]
pub(crate) struct UpdateServiceAccountRequest<'a> {
    pub role: &'a str,
}

/// Body of `POST /api/serviceaccounts/{id}/tokens`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateTokenRequest<'a> {
    pub name: &'a str,
    pub seconds_to_live: u64,
}

/// Response of `GET /api/serviceaccounts/search`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServiceAccountSearchResponse {
    #[serde(default)]
    pub service_accounts: Vec<ServiceAccountResponse>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServiceAccountResponse {
    pub id: Value,
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
}

impl From<ServiceAccountResponse> for ServiceAccount {
    fn from(raw: ServiceAccountResponse) -> Self {
        Self {
            id: id_to_string(&raw.id),
            name: raw.name,
            role: raw.role.unwrap_or_default(),
        }
    }
}

/// One entry of `GET /api/serviceaccounts/{id}/tokens`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TokenResponse {
    pub id: Value,
    pub name: String,
    #[serde(default)]
    pub expiration: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub expires: Option<String>,
    #[serde(default)]
    pub has_expired: Option<bool>,
    #[serde(default)]
    pub is_revoked: Option<bool>,
    #[serde(default)]
    pub revoked: Option<bool>,
}

impl From<TokenResponse> for Token {
    fn from(raw: TokenResponse) -> Self {
        let mut expires_at = [&raw.expiration, &raw.expires_at, &raw.expires]
            .into_iter()
            .flatten()
            .find_map(|s| parse_timestamp(s));

        // Some versions only report the flag; treat the token as already expired
        if raw.has_expired == Some(true) && expires_at.is_none() {
            expires_at = Some(DateTime::<Utc>::UNIX_EPOCH);
        }

        Self {
            id: id_to_string(&raw.id),
            name: raw.name,
            expires_at,
            revoked: raw.is_revoked.or(raw.revoked).unwrap_or(false),
        }
    }
}

/// Response of `POST /api/serviceaccounts/{id}/tokens`
#[derive(Debug, Deserialize)]
pub(crate) struct CreateTokenResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

impl CreateTokenResponse {
    pub(crate) fn into_created(self, requested_name: &str) -> CreatedToken {
        let secret = [self.key, self.token, self.value]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
            .map(SecretValue::new);

        CreatedToken {
            id: self.id.as_ref().map(id_to_string).unwrap_or_default(),
            name: self.name.unwrap_or_else(|| requested_name.to_string()),
            secret,
        }
    }
}

/// Grafana error body
#[derive(Debug, Deserialize)]
pub(crate) struct GrafanaErrorResponse {
    #[serde(default)]
    pub message: Option<String>,
}

/// Ids are numbers on current Grafana and strings on some proxies
fn id_to_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// RFC 3339 timestamps; Grafana reports "no expiry" as an empty string or the zero time
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with("0001-01-01") {
        return None;
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
