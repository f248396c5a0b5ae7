//! # Status
//!
//! Read-only snapshot used by the `status` command.

use std::fmt;

use crate::model::{most_recent, ServiceAccount, Token};

#[derive(Debug, Clone)]
pub struct TokenState {
    pub token: Token,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub service_account: String,
    pub account: Option<ServiceAccount>,
    pub tokens: Vec<TokenState>,
    pub stored_name: Option<String>,
    pub stored_value_present: bool,
}

impl StatusReport {
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.tokens.iter().filter(|t| t.active).count()
    }

    /// The stored name references an active token
    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.stored_name.as_deref().is_some_and(|name| {
            self.tokens
                .iter()
                .any(|t| t.active && t.token.name == name)
        })
    }

    /// Healthy means one active token, a stored value, and a stored name pointing at it
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.active_count() == 1 && self.stored_value_present && self.is_linked()
    }

    /// Name the next reconcile would adopt when the stored name is missing
    #[must_use]
    pub fn newest_active(&self) -> Option<String> {
        let active: Vec<Token> = self
            .tokens
            .iter()
            .filter(|t| t.active)
            .map(|t| t.token.clone())
            .collect();
        most_recent(&active).map(|t| t.name.clone())
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.account {
            Some(account) => writeln!(
                f,
                "service account: {} (id {}, role {})",
                account.name, account.id, account.role
            )?,
            None => writeln!(f, "service account: {} (missing)", self.service_account)?,
        }
        writeln!(
            f,
            "tokens: {} total, {} active",
            self.tokens.len(),
            self.active_count()
        )?;
        for state in &self.tokens {
            let expires = state
                .token
                .expires_at
                .map_or_else(|| "never".to_string(), |at| at.to_rfc3339());
            let marker = if state.token.revoked {
                "revoked"
            } else if state.active {
                "active"
            } else {
                "expired"
            };
            writeln!(f, "  - {} [{marker}] expires {expires}", state.token.name)?;
        }
        if let Some(newest) = self.newest_active() {
            writeln!(f, "newest active: {newest}")?;
        }
        writeln!(
            f,
            "stored name: {}",
            self.stored_name.as_deref().unwrap_or("<none>")
        )?;
        writeln!(
            f,
            "stored value: {}",
            if self.stored_value_present { "present" } else { "missing" }
        )?;
        write!(f, "healthy: {}", self.is_healthy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(name: &str, active: bool) -> TokenState {
        TokenState {
            token: Token {
                id: name.to_string(),
                name: name.to_string(),
                expires_at: None,
                revoked: !active,
            },
            active,
        }
    }

    fn report(tokens: Vec<TokenState>, stored_name: Option<&str>, value: bool) -> StatusReport {
        StatusReport {
            service_account: "grafana-automation".to_string(),
            account: Some(ServiceAccount {
                id: "7".to_string(),
                name: "grafana-automation".to_string(),
                role: "Admin".to_string(),
            }),
            tokens,
            stored_name: stored_name.map(str::to_string),
            stored_value_present: value,
        }
    }

    #[test]
    fn test_healthy_when_single_linked_token() {
        let r = report(vec![state("sa-1", true), state("sa-0", false)], Some("sa-1"), true);
        assert_eq!(r.active_count(), 1);
        assert!(r.is_linked());
        assert!(r.is_healthy());
    }

    #[test]
    fn test_unhealthy_states() {
        // Name points at a revoked token
        assert!(!report(vec![state("sa-1", true), state("sa-0", false)], Some("sa-0"), true).is_healthy());
        // Two active tokens
        assert!(!report(vec![state("sa-1", true), state("sa-2", true)], Some("sa-2"), true).is_healthy());
        // No stored value
        assert!(!report(vec![state("sa-1", true)], Some("sa-1"), false).is_healthy());
    }

    #[test]
    fn test_newest_active_and_display() {
        let r = report(
            vec![state("sa-20240101000000", true), state("sa-20240301000000", true)],
            None,
            true,
        );
        assert_eq!(r.newest_active().as_deref(), Some("sa-20240301000000"));

        let text = r.to_string();
        assert!(text.contains("2 total, 2 active"));
        assert!(text.contains("newest active: sa-20240301000000"));
        assert!(text.contains("stored name: <none>"));
        assert!(text.ends_with("healthy: false"));
    }
}
