//! # Reconciliation Engine
//!
//! Rule precedence, first match wins:
//!
//! 1. Delete expired and revoked tokens
//! 2. Stored value, no active token: recreate (when `stale_recreate`)
//! 3. Stored value, no stored name: adopt the newest active token's name
//! 4. Several active tokens: prune to one (unless multiple are allowed)
//! 5. Stored name matches no active token: repoint it (when `fix_name_mismatch`)
//! 6. Reuse-only: hand back the stored value
//! 7. Rotate, nothing active, stale or nothing stored: create a token
//! 8. Otherwise reuse the stored value
//!
//! Reuse-only failures are detected before anything is mutated.

use anyhow::{anyhow, Context};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::clock::Clock;
use crate::constants::TOKEN_NAME_ATTEMPTS;
use crate::error::{Result, TokenManagerError};
use crate::model::{
    active_tokens, most_recent, token_name_for, SecretValue, ServiceAccount, ServiceAccountSpec,
    StoredCredential, Token,
};
use crate::observability::metrics;
use crate::provider::{GrafanaAccountApi, SecretStore};

use super::prune::{prune_to_single, PrunePolicy, PruneReport};
use super::status::{StatusReport, TokenState};
use super::types::{
    ReconcileActions, ReconcileOptions, ReconcileOutcome, ReconcileStatus, SecretNames,
};

/// Decides and applies the token action for one service account
pub struct TokenReconciler {
    grafana: Arc<dyn GrafanaAccountApi>,
    secret_store: Arc<dyn SecretStore>,
    clock: Arc<dyn Clock>,
    secret_names: SecretNames,
    prune_policy: PrunePolicy,
}

impl std::fmt::Debug for TokenReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenReconciler")
            .field("secret_names", &self.secret_names)
            .field("prune_policy", &self.prune_policy)
            .finish_non_exhaustive()
    }
}

impl TokenReconciler {
    #[must_use]
    pub fn new(
        grafana: Arc<dyn GrafanaAccountApi>,
        secret_store: Arc<dyn SecretStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            grafana,
            secret_store,
            clock,
            secret_names: SecretNames::default(),
            prune_policy: PrunePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_secret_names(mut self, secret_names: SecretNames) -> Self {
        self.secret_names = secret_names;
        self
    }

    #[must_use]
    pub fn with_prune_policy(mut self, prune_policy: PrunePolicy) -> Self {
        self.prune_policy = prune_policy;
        self
    }

    /// Make Grafana and the secret store agree on exactly one usable token.
    ///
    /// # Errors
    ///
    /// - [`TokenManagerError::NoCredentialAvailable`] in reuse-only mode with nothing to reuse
    /// - [`TokenManagerError::TokenCreationFailed`] when a created token carries no value
    /// - [`TokenManagerError::Backend`] when a listing, account or persistence call fails
    pub async fn reconcile(
        &self,
        spec: &ServiceAccountSpec,
        options: &ReconcileOptions,
    ) -> Result<ReconcileOutcome> {
        let span = info_span!(
            "reconcile",
            service_account = %spec.name,
            rotate = options.rotate,
            reuse_only = options.reuse_only,
            dry_run = options.dry_run
        );
        async {
            let outcome = self.run(spec, options).await?;
            if !outcome.dry_run {
                self.publish(&outcome).await?;
            }
            Ok::<_, TokenManagerError>(outcome)
        }
        .instrument(span)
        .await
    }

    /// Read-only view of the account, its tokens and the stored credential
    ///
    /// # Errors
    ///
    /// Returns an error if Grafana or the secret store cannot be read.
    pub async fn status(&self, spec: &ServiceAccountSpec) -> Result<StatusReport> {
        let stored = self.read_stored().await?;
        let account = self
            .grafana
            .find_service_account(&spec.name)
            .await
            .context("Failed to look up service account")?;
        let tokens = match &account {
            Some(account) => self
                .grafana
                .list_tokens(account)
                .await
                .context("Failed to list service account tokens")?,
            None => Vec::new(),
        };
        let now = self.clock.now();

        Ok(StatusReport {
            service_account: spec.name.clone(),
            account,
            tokens: tokens
                .into_iter()
                .map(|token| TokenState {
                    active: token.is_active(now),
                    token,
                })
                .collect(),
            stored_name: stored.name,
            stored_value_present: stored.value.is_some(),
        })
    }

    async fn run(
        &self,
        spec: &ServiceAccountSpec,
        options: &ReconcileOptions,
    ) -> Result<ReconcileOutcome> {
        let mut actions = ReconcileActions::default();

        let stored = self.read_stored().await?;
        let existing = self
            .grafana
            .find_service_account(&spec.name)
            .await
            .context("Failed to look up service account")?;
        let observed = match &existing {
            Some(account) => self
                .grafana
                .list_tokens(account)
                .await
                .context("Failed to list service account tokens")?,
            None => Vec::new(),
        };
        let now = self.clock.now();
        let mut active = active_tokens(&observed, now);

        info!(
            tokens = observed.len(),
            active = active.len(),
            stored_name = stored.name.as_deref().unwrap_or("<none>"),
            stored_value = stored.has_value(),
            "Observed current state"
        );

        self.check_reuse_only(spec, &stored, &active, options)?;

        let account = self
            .ensure_service_account(spec, existing, options, &mut actions)
            .await?;

        // 1. expired and revoked tokens
        if let Some(account) = &account {
            self.sweep_inactive(account, &observed, now, options, &mut actions)
                .await;
        }

        let value = stored.value;
        let mut name = stored.name;
        let mut name_dirty = false;

        // 2. stored value but nothing behind it
        let stale = value.is_some() && active.is_empty() && options.stale_recreate;
        if stale {
            warn!("Stored token value has no active token behind it, a new token will be created");
        }

        // 3. interrupted write left a value without a name
        if value.is_some() && name.is_none() {
            if let Some(latest) = most_recent(&active) {
                info!(token = %latest.name, "Inferred missing stored token name from newest active token");
                name = Some(latest.name.clone());
                name_dirty = true;
            }
        }

        // 4. more than one active token
        if active.len() > 1 && !options.allow_multiple_active {
            if options.cleanup_all_others {
                if let Some(account) = &account {
                    let keep = name
                        .as_deref()
                        .filter(|n| active.iter().any(|t| t.name == *n))
                        .or_else(|| most_recent(&active).map(|t| t.name.as_str()))
                        .map(str::to_string);
                    if let Some(keep) = keep {
                        let report = self.prune(account, &keep, &active, options).await;
                        actions.pruned += report.deleted;
                        if !report.observed {
                            warn!("Token list after pruning is unconfirmed, deciding on the last known state");
                        }
                        active = report.remaining;
                    }
                }
            } else {
                info!(
                    active = active.len(),
                    "Several active tokens present; cleanup of others is disabled"
                );
            }
        }

        // 5. stored name points at nothing live
        if value.is_some() && options.fix_name_mismatch {
            if let Some(current) = name.as_deref() {
                if !active.iter().any(|t| t.name == current) {
                    if let Some(latest) = most_recent(&active) {
                        info!(
                            stored = current,
                            token = %latest.name,
                            "Stored token name matches no active token, repointing"
                        );
                        name = Some(latest.name.clone());
                        name_dirty = true;
                    }
                }
            }
        }

        // 6. reuse-only hands back what is stored
        if options.reuse_only && !options.rotate && !active.is_empty() {
            let value = value.ok_or_else(|| TokenManagerError::NoCredentialAvailable {
                service_account: spec.name.clone(),
            })?;
            if name_dirty {
                self.persist_name(name.as_deref(), options, &mut actions)
                    .await?;
            }
            info!(token = name.as_deref().unwrap_or("<unknown>"), "Reusing stored token (reuse-only)");
            return Ok(ReconcileOutcome {
                status: ReconcileStatus::Reused,
                token_name: name,
                value: Some(value),
                actions,
                dry_run: options.dry_run,
            });
        }

        // 7. create
        let must_create = options.rotate || active.is_empty() || stale || value.is_none();
        if must_create {
            return self
                .create_and_persist(spec, account.as_ref(), value, &observed, options, actions)
                .await;
        }

        // 8. reuse
        if name_dirty {
            self.persist_name(name.as_deref(), options, &mut actions)
                .await?;
        }
        let linked = name
            .as_deref()
            .is_some_and(|n| active.iter().any(|t| t.name == n));
        let status = if linked {
            ReconcileStatus::Reused
        } else {
            ReconcileStatus::NoOp
        };
        info!(
            %status,
            token = name.as_deref().unwrap_or("<unknown>"),
            "Keeping stored token"
        );

        Ok(ReconcileOutcome {
            status,
            token_name: name,
            value,
            actions,
            dry_run: options.dry_run,
        })
    }

    /// Reuse-only with nothing reusable fails before any mutation
    fn check_reuse_only(
        &self,
        spec: &ServiceAccountSpec,
        stored: &StoredCredential,
        active: &[Token],
        options: &ReconcileOptions,
    ) -> Result<()> {
        if !options.reuse_only || options.rotate {
            return Ok(());
        }
        let recoverable_stale = stored.has_value() && active.is_empty() && options.stale_recreate;
        if recoverable_stale {
            return Ok(());
        }
        if !stored.has_value() || active.is_empty() {
            return Err(TokenManagerError::NoCredentialAvailable {
                service_account: spec.name.clone(),
            });
        }
        Ok(())
    }

    async fn read_stored(&self) -> Result<StoredCredential> {
        let value = self
            .secret_store
            .get_secret(&self.secret_names.value)
            .await
            .with_context(|| format!("Failed to read secret '{}'", self.secret_names.value))?;
        let name = self
            .secret_store
            .get_secret(&self.secret_names.name)
            .await
            .with_context(|| format!("Failed to read secret '{}'", self.secret_names.name))?;
        Ok(StoredCredential::from_raw(name, value))
    }

    /// Returns `None` only in dry-run when the account does not exist yet
    async fn ensure_service_account(
        &self,
        spec: &ServiceAccountSpec,
        existing: Option<ServiceAccount>,
        options: &ReconcileOptions,
        actions: &mut ReconcileActions,
    ) -> Result<Option<ServiceAccount>> {
        match existing {
            Some(account) => {
                if !account.role.eq_ignore_ascii_case(&spec.role) {
                    actions.role_updated = true;
                    if options.dry_run {
                        info!(from = %account.role, to = %spec.role, "[dry-run] Would update service account role");
                    } else {
                        self.grafana
                            .update_service_account_role(&account, &spec.role)
                            .await
                            .context("Failed to update service account role")?;
                        info!(from = %account.role, to = %spec.role, "Updated service account role");
                    }
                }
                Ok(Some(account))
            }
            None => {
                actions.account_created = true;
                if options.dry_run {
                    info!(role = %spec.role, "[dry-run] Would create service account");
                    return Ok(None);
                }
                let account = self
                    .grafana
                    .create_service_account(&spec.name, &spec.role)
                    .await
                    .context("Failed to create service account")?;
                info!(id = %account.id, role = %account.role, "Created service account");
                Ok(Some(account))
            }
        }
    }

    /// Best effort: failures are logged and the run continues
    async fn sweep_inactive(
        &self,
        account: &ServiceAccount,
        tokens: &[Token],
        now: chrono::DateTime<chrono::Utc>,
        options: &ReconcileOptions,
        actions: &mut ReconcileActions,
    ) {
        for token in tokens.iter().filter(|t| !t.is_active(now)) {
            if options.dry_run {
                info!(token = %token.name, revoked = token.revoked, "[dry-run] Would delete inactive token");
                actions.expired_deleted += 1;
                continue;
            }
            match self.grafana.delete_token(account, token).await {
                Ok(()) => {
                    actions.expired_deleted += 1;
                    metrics::increment_tokens_deleted("expired");
                    info!(token = %token.name, revoked = token.revoked, "Deleted inactive token");
                }
                Err(e) => {
                    warn!(token = %token.name, error = %format!("{e:#}"), "Failed to delete inactive token");
                }
            }
        }
    }

    async fn prune(
        &self,
        account: &ServiceAccount,
        keep: &str,
        known_active: &[Token],
        options: &ReconcileOptions,
    ) -> PruneReport {
        prune_to_single(
            self.grafana.as_ref(),
            self.clock.as_ref(),
            account,
            keep,
            known_active,
            &self.prune_policy,
            options.dry_run,
        )
        .await
    }

    async fn create_and_persist(
        &self,
        spec: &ServiceAccountSpec,
        account: Option<&ServiceAccount>,
        stored_value: Option<SecretValue>,
        observed: &[Token],
        options: &ReconcileOptions,
        mut actions: ReconcileActions,
    ) -> Result<ReconcileOutcome> {
        let token_name = self.fresh_token_name(spec, observed).await?;
        actions.token_created = true;

        if options.dry_run {
            info!(
                token = %token_name,
                ttl_secs = options.token_ttl.as_secs(),
                "[dry-run] Would create token and store it"
            );
            return Ok(ReconcileOutcome {
                status: ReconcileStatus::Created,
                token_name: Some(token_name),
                value: stored_value,
                actions,
                dry_run: true,
            });
        }

        let account = account.ok_or_else(|| {
            TokenManagerError::Backend(anyhow!("Service account '{}' is missing", spec.name))
        })?;

        let created = self
            .grafana
            .create_token(account, &token_name, options.token_ttl)
            .await
            .map_err(|e| TokenManagerError::TokenCreationFailed {
                token_name: token_name.clone(),
                reason: format!("{e:#}"),
            })?;

        let Some(value) = created.secret.clone() else {
            // A token nobody can use; take it back out so the run leaves no trace
            let orphan = Token {
                id: created.id.clone(),
                name: created.name.clone(),
                expires_at: None,
                revoked: false,
            };
            if let Err(e) = self.grafana.delete_token(account, &orphan).await {
                warn!(token = %created.name, error = %format!("{e:#}"), "Failed to delete token created without a value");
            }
            return Err(TokenManagerError::TokenCreationFailed {
                token_name,
                reason: "response carried no token value".to_string(),
            });
        };
        metrics::increment_tokens_created();
        info!(token = %created.name, "Created token");

        // Value first: a failure in between leaves a value without a name, which the next run repairs
        if self
            .secret_store
            .set_secret(&self.secret_names.value, value.expose(), true)
            .await
            .with_context(|| format!("Failed to store secret '{}'", self.secret_names.value))?
        {
            actions.secrets_written += 1;
        }
        if self
            .secret_store
            .set_secret(&self.secret_names.name, &created.name, false)
            .await
            .with_context(|| format!("Failed to store secret '{}'", self.secret_names.name))?
        {
            actions.secrets_written += 1;
        }

        if !options.allow_multiple_active {
            let kept = Token {
                id: created.id.clone(),
                name: created.name.clone(),
                expires_at: None,
                revoked: false,
            };
            let report = self
                .prune(account, &created.name, std::slice::from_ref(&kept), options)
                .await;
            actions.pruned += report.deleted;
        }

        Ok(ReconcileOutcome {
            status: ReconcileStatus::Created,
            token_name: Some(created.name),
            value: Some(value),
            actions,
            dry_run: false,
        })
    }

    /// Token names carry one-second resolution; a name still in use waits for the next second
    async fn fresh_token_name(&self, spec: &ServiceAccountSpec, taken: &[Token]) -> Result<String> {
        let mut token_name = token_name_for(&spec.name, self.clock.now());
        for _ in 0..TOKEN_NAME_ATTEMPTS {
            if !taken.iter().any(|t| t.name == token_name) {
                return Ok(token_name);
            }
            debug!(token = %token_name, "Token name already in use, waiting for the next second");
            self.clock.sleep(Duration::from_secs(1)).await;
            token_name = token_name_for(&spec.name, self.clock.now());
        }
        Err(TokenManagerError::TokenCreationFailed {
            token_name,
            reason: "no unused token name available".to_string(),
        })
    }

    /// Hand the credential to the secret store's consumers, changed or not
    async fn publish(&self, outcome: &ReconcileOutcome) -> Result<()> {
        if let Some(value) = &outcome.value {
            self.secret_store
                .publish(&self.secret_names.value, value.expose(), true)
                .await
                .with_context(|| format!("Failed to publish secret '{}'", self.secret_names.value))?;
        }
        if let Some(name) = &outcome.token_name {
            self.secret_store
                .publish(&self.secret_names.name, name, false)
                .await
                .with_context(|| format!("Failed to publish secret '{}'", self.secret_names.name))?;
        }
        Ok(())
    }

    async fn persist_name(
        &self,
        name: Option<&str>,
        options: &ReconcileOptions,
        actions: &mut ReconcileActions,
    ) -> Result<()> {
        let Some(name) = name else {
            return Ok(());
        };
        actions.name_repaired = true;
        if options.dry_run {
            info!(token = name, "[dry-run] Would store repaired token name");
            return Ok(());
        }
        if self
            .secret_store
            .set_secret(&self.secret_names.name, name, false)
            .await
            .with_context(|| format!("Failed to store secret '{}'", self.secret_names.name))?
        {
            actions.secrets_written += 1;
        }
        Ok(())
    }
}
