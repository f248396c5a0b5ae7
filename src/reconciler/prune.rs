//! # Pruning
//!
//! Reduce the active tokens of a service account to a single kept token.
//!
//! The token API can lag behind deletions, so one pass is not always enough:
//! the loop re-lists, deletes whatever is still extra and backs off between
//! passes. It stops once at most one active token remains or a pass makes no
//! progress. Failing to converge is logged, never fatal.
//!
//! A failed listing never empties the picture: `remaining` falls back to the
//! last known active set minus whatever this loop deleted.

use tracing::{debug, info, warn};

use crate::backoff::FibonacciBackoff;
use crate::clock::Clock;
use crate::constants::{
    DEFAULT_PRUNE_BACKOFF_MAX_SECS, DEFAULT_PRUNE_BACKOFF_MIN_SECS, DEFAULT_PRUNE_MAX_ATTEMPTS,
};
use crate::model::{active_tokens, ServiceAccount, Token};
use crate::observability::metrics;
use crate::provider::GrafanaAccountApi;

/// Retry bounds of the prune loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrunePolicy {
    pub max_attempts: u32,
    pub backoff_min_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for PrunePolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_PRUNE_MAX_ATTEMPTS,
            backoff_min_secs: DEFAULT_PRUNE_BACKOFF_MIN_SECS,
            backoff_max_secs: DEFAULT_PRUNE_BACKOFF_MAX_SECS,
        }
    }
}

impl PrunePolicy {
    /// Same attempts, no sleeping between passes
    #[must_use]
    pub fn without_backoff(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_min_secs: 0,
            backoff_max_secs: 0,
        }
    }
}

/// Outcome of a prune loop
#[derive(Debug, Clone, Default)]
pub struct PruneReport {
    /// Tokens deleted (planned deletions in dry-run)
    pub deleted: usize,
    /// Passes run
    pub attempts: u32,
    /// At most one active token remained when the loop stopped
    pub converged: bool,
    /// Active tokens at the end of the loop
    pub remaining: Vec<Token>,
    /// `remaining` comes from a listing taken after the last deletion
    pub observed: bool,
}

/// Delete every active token not named `keep_name` until at most one remains.
///
/// `known_active` is the caller's current view; it stands in for the token
/// list whenever the backend cannot be listed.
pub(crate) async fn prune_to_single(
    grafana: &dyn GrafanaAccountApi,
    clock: &dyn Clock,
    account: &ServiceAccount,
    keep_name: &str,
    known_active: &[Token],
    policy: &PrunePolicy,
    dry_run: bool,
) -> PruneReport {
    let mut backoff = FibonacciBackoff::new(policy.backoff_min_secs, policy.backoff_max_secs);
    let mut report = PruneReport {
        remaining: known_active.to_vec(),
        ..PruneReport::default()
    };
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        report.attempts = attempt;

        let Some(active) = list_active(grafana, clock, account).await else {
            report.observed = false;
            break;
        };
        report.remaining.clone_from(&active);
        report.observed = true;

        if active.len() <= 1 {
            report.converged = true;
            break;
        }

        let extra: Vec<&Token> = active.iter().filter(|t| t.name != keep_name).collect();
        if extra.is_empty() {
            // Several active tokens all carrying the kept name; nothing we may delete
            warn!(
                service_account = %account.name,
                keep = keep_name,
                active = active.len(),
                "Active tokens share the kept name, leaving them in place"
            );
            break;
        }

        if dry_run {
            for token in &extra {
                info!(
                    service_account = %account.name,
                    token = %token.name,
                    "[dry-run] Would delete extra active token"
                );
            }
            report.deleted += extra.len();
            report.remaining = active.into_iter().filter(|t| t.name == keep_name).collect();
            report.converged = report.remaining.len() <= 1;
            return report;
        }

        let mut deleted_this_pass = 0;
        for token in extra {
            match grafana.delete_token(account, token).await {
                Ok(()) => {
                    deleted_this_pass += 1;
                    report.remaining.retain(|t| t.id != token.id);
                    report.observed = false;
                    metrics::increment_tokens_deleted("pruned");
                    info!(
                        service_account = %account.name,
                        token = %token.name,
                        "Deleted extra active token"
                    );
                }
                Err(e) => {
                    warn!(
                        service_account = %account.name,
                        token = %token.name,
                        error = %format!("{e:#}"),
                        "Failed to delete extra active token"
                    );
                }
            }
        }
        report.deleted += deleted_this_pass;

        if deleted_this_pass == 0 {
            warn!(
                service_account = %account.name,
                attempt,
                "Prune pass deleted nothing, giving up"
            );
            break;
        }

        if attempt < max_attempts {
            let delay = backoff.next_backoff();
            debug!(attempt, delay_secs = delay.as_secs(), "Re-checking active tokens after backoff");
            clock.sleep(delay).await;
        }
    }

    if !report.converged && !report.observed {
        // Observe the state the last pass left behind
        if let Some(active) = list_active(grafana, clock, account).await {
            report.remaining = active;
            report.observed = true;
        }
    }
    report.converged = report.remaining.len() <= 1;

    if !report.converged {
        warn!(
            service_account = %account.name,
            keep = keep_name,
            remaining = report.remaining.len(),
            attempts = report.attempts,
            "Could not reduce active tokens to one; the next run will retry"
        );
    }

    report
}

async fn list_active(
    grafana: &dyn GrafanaAccountApi,
    clock: &dyn Clock,
    account: &ServiceAccount,
) -> Option<Vec<Token>> {
    match grafana.list_tokens(account).await {
        Ok(tokens) => Some(active_tokens(&tokens, clock.now())),
        Err(e) => {
            warn!(
                service_account = %account.name,
                error = %format!("{e:#}"),
                "Failed to list tokens while pruning"
            );
            None
        }
    }
}
