//! # Model
//!
//! Service accounts, tokens and the persisted credential.
//!
//! A token's secret value is only visible in the response to the call that
//! created it. Grafana never returns it again, so the value must be written to
//! the secret store the moment it exists; everything the reconciler can observe
//! later is token metadata.

use chrono::{DateTime, Utc};
use std::fmt;
use zeroize::Zeroizing;

use crate::constants::TOKEN_NAME_TIMESTAMP_FORMAT;

/// A Grafana service account as returned by the API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccount {
    pub id: String,
    pub name: String,
    pub role: String,
}

/// Desired service account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccountSpec {
    pub name: String,
    pub role: String,
}

/// Metadata of one service-account API token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub id: String,
    pub name: String,
    /// `None` means the token never expires (or the backend did not say)
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
}

impl Token {
    /// Not revoked and not past its expiry
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

/// A bearer credential. Zeroed on drop, never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(Zeroizing<String>);

impl SecretValue {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue([REDACTED])")
    }
}

impl From<String> for SecretValue {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// The (name, value) pair held in the secret store.
///
/// Either half may be missing: a value without a name is a known degraded state
/// left behind by an interrupted write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredCredential {
    pub name: Option<String>,
    pub value: Option<SecretValue>,
}

impl StoredCredential {
    /// Build from raw secret-store reads; blank strings count as absent
    #[must_use]
    pub fn from_raw(name: Option<String>, value: Option<String>) -> Self {
        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        let value = value.filter(|v| !v.trim().is_empty()).map(SecretValue::new);
        Self { name, value }
    }

    #[must_use]
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }
}

/// Tokens that are neither revoked nor expired at `now`
#[must_use]
pub fn active_tokens(tokens: &[Token], now: DateTime<Utc>) -> Vec<Token> {
    tokens.iter().filter(|t| t.is_active(now)).cloned().collect()
}

/// The most recently created token of a set.
///
/// Names embed a fixed-width UTC timestamp, so the lexicographically greatest
/// name is the newest.
#[must_use]
pub fn most_recent(tokens: &[Token]) -> Option<&Token> {
    tokens.iter().max_by(|a, b| a.name.cmp(&b.name))
}

/// `<account>-<yyyymmddHHMMSS>`
#[must_use]
pub fn token_name_for(service_account: &str, now: DateTime<Utc>) -> String {
    format!(
        "{service_account}-{}",
        now.format(TOKEN_NAME_TIMESTAMP_FORMAT)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn token(name: &str, expires_at: Option<DateTime<Utc>>, revoked: bool) -> Token {
        Token {
            id: name.to_string(),
            name: name.to_string(),
            expires_at,
            revoked,
        }
    }

    #[test]
    fn test_active_state() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        assert!(token("a", None, false).is_active(now));
        assert!(token("b", Some(now + Duration::days(1)), false).is_active(now));
        assert!(!token("c", Some(now - Duration::seconds(1)), false).is_active(now));
        // Expiring exactly now is already expired
        assert!(!token("d", Some(now), false).is_active(now));
        assert!(!token("e", None, true).is_active(now));
    }

    #[test]
    fn test_most_recent_uses_name_order() {
        let tokens = vec![
            token("sa-20240101000000", None, false),
            token("sa-20240301000000", None, false),
            token("sa-20240201000000", None, false),
        ];
        assert_eq!(most_recent(&tokens).unwrap().name, "sa-20240301000000");
        assert!(most_recent(&[]).is_none());
    }

    #[test]
    fn test_token_name_format() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(token_name_for("sa", now), "sa-20240102030405");
    }

    #[test]
    fn test_stored_credential_normalises_blanks() {
        let stored = StoredCredential::from_raw(Some("  ".to_string()), Some("v".to_string()));
        assert!(stored.name.is_none());
        assert_eq!(stored.value.as_ref().map(SecretValue::expose), Some("v"));

        let empty = StoredCredential::from_raw(None, Some(String::new()));
        assert!(!empty.has_value());
    }

    #[test]
    fn test_secret_value_is_redacted() {
        let secret = SecretValue::new("glsa_supersecret");
        let rendered = format!("{secret:?}");
        assert!(!rendered.contains("supersecret"));
        assert_eq!(secret.expose(), "glsa_supersecret");
    }
}
