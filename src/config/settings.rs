//! # Settings
//!
//! Everything a run needs, loaded from environment variables (pipeline
//! variables, a `.env` file) and then overridden by CLI flags.
//!
//! Loading never fails on a missing value; [`Settings::validate`] is the single
//! place that rejects an unusable configuration, and it runs before any
//! backend call.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cli::{ReconcileArgs, TargetArgs};
use crate::constants::{
    DEFAULT_PRUNE_MAX_ATTEMPTS, DEFAULT_SERVICE_ACCOUNT_ROLE, DEFAULT_SERVICE_ACCOUNT_SUFFIX,
    DEFAULT_TOKEN_NAME_SECRET_NAME, DEFAULT_TOKEN_SECRET_NAME, DEFAULT_TOKEN_TTL,
};
use crate::error::{Result, TokenManagerError};
use crate::model::{SecretValue, ServiceAccountSpec};
use crate::observability::logging::LogFormat;
use crate::provider::azure::AzureAuthMethod;
use crate::provider::grafana::endpoint::GrafanaResourceRef;
use crate::reconciler::{PrunePolicy, ReconcileOptions, SecretNames};
use crate::validation::{
    parse_duration, validate_key_vault_secret_name, validate_service_account_name,
};

/// Where the persisted credential lives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// Pipeline secret variables: read from the environment, written as logging commands
    #[default]
    SecretVariable,
    /// Azure Key Vault secrets
    KeyVault,
}

impl FromStr for OutputMode {
    type Err = TokenManagerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "secret-variable" | "secretvariable" | "variable" | "pipeline" => {
                Ok(Self::SecretVariable)
            }
            "keyvault" | "key-vault" => Ok(Self::KeyVault),
            other => Err(TokenManagerError::Config(format!(
                "Unknown OUTPUT_MODE '{other}'. Expected: secret-variable or keyvault"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
#[allow(
    clippy::struct_excessive_bools,
    reason = "Reconcile switches are independent flags"
)]
pub struct Settings {
    /// Azure Managed Grafana instance name
    pub instance_name: String,
    /// Explicit Grafana base URL; looked up through Azure Resource Manager when unset
    pub endpoint: Option<String>,
    pub subscription_id: Option<String>,
    pub resource_group: Option<String>,
    /// Defaults to `<instance>-automation`
    pub service_account_name: Option<String>,
    pub service_account_role: String,
    /// Duration string, e.g. `90d`
    pub token_ttl: String,
    /// Static Grafana API token used instead of an Entra token
    pub api_token: Option<SecretValue>,
    pub output_mode: OutputMode,
    pub key_vault_name: Option<String>,
    pub token_secret_name: String,
    pub token_name_secret_name: String,
    pub rotate: bool,
    pub reuse_only: bool,
    pub allow_multiple_active: bool,
    pub cleanup_all_others: bool,
    pub fix_name_mismatch: bool,
    pub stale_recreate: bool,
    pub dry_run: bool,
    pub prune_max_attempts: u32,
    pub azure_auth: AzureAuthMethod,
    pub azure_client_id: Option<String>,
    pub log_level: String,
    pub log_format: LogFormat,
    /// node-exporter textfile collector target
    pub metrics_textfile: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            instance_name: String::new(),
            endpoint: None,
            subscription_id: None,
            resource_group: None,
            service_account_name: None,
            service_account_role: DEFAULT_SERVICE_ACCOUNT_ROLE.to_string(),
            token_ttl: DEFAULT_TOKEN_TTL.to_string(),
            api_token: None,
            output_mode: OutputMode::default(),
            key_vault_name: None,
            token_secret_name: DEFAULT_TOKEN_SECRET_NAME.to_string(),
            token_name_secret_name: DEFAULT_TOKEN_NAME_SECRET_NAME.to_string(),
            rotate: false,
            reuse_only: false,
            allow_multiple_active: false,
            cleanup_all_others: true,
            fix_name_mismatch: true,
            stale_recreate: true,
            dry_run: false,
            prune_max_attempts: DEFAULT_PRUNE_MAX_ATTEMPTS,
            azure_auth: AzureAuthMethod::default(),
            azure_client_id: None,
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            metrics_textfile: None,
        }
    }
}

impl Settings {
    /// Load from the process environment
    ///
    /// # Errors
    ///
    /// Returns [`TokenManagerError::Config`] for an unrecognised enum value
    /// (`OUTPUT_MODE`, `AZURE_AUTH`, `LOG_FORMAT`).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary variable lookup
    ///
    /// # Errors
    ///
    /// See [`Settings::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let env = EnvReader { lookup: &lookup };

        let output_mode = match env.optional("OUTPUT_MODE") {
            Some(raw) => raw.parse()?,
            None => defaults.output_mode,
        };
        let azure_auth = match env.optional("AZURE_AUTH") {
            Some(raw) => raw
                .parse()
                .map_err(|e: anyhow::Error| TokenManagerError::Config(e.to_string()))?,
            None => defaults.azure_auth,
        };
        let log_format = match env.optional("LOG_FORMAT") {
            Some(raw) => raw
                .parse()
                .map_err(|e: anyhow::Error| TokenManagerError::Config(e.to_string()))?,
            None => defaults.log_format,
        };

        Ok(Self {
            instance_name: env.or_default_str("GRAFANA_INSTANCE_NAME", ""),
            endpoint: env.optional("GRAFANA_ENDPOINT"),
            subscription_id: env.optional("AZURE_SUBSCRIPTION_ID"),
            resource_group: env.optional("AZURE_RESOURCE_GROUP"),
            service_account_name: env.optional("GRAFANA_SERVICE_ACCOUNT_NAME"),
            service_account_role: env
                .or_default_str("GRAFANA_SERVICE_ACCOUNT_ROLE", DEFAULT_SERVICE_ACCOUNT_ROLE),
            token_ttl: env.or_default_str("GRAFANA_TOKEN_TTL", DEFAULT_TOKEN_TTL),
            api_token: env.optional("GRAFANA_API_TOKEN").map(SecretValue::new),
            output_mode,
            key_vault_name: env.optional("KEY_VAULT_NAME"),
            token_secret_name: env.or_default_str("TOKEN_SECRET_NAME", DEFAULT_TOKEN_SECRET_NAME),
            token_name_secret_name: env
                .or_default_str("TOKEN_NAME_SECRET_NAME", DEFAULT_TOKEN_NAME_SECRET_NAME),
            rotate: env.or_default_bool("ROTATE", defaults.rotate),
            reuse_only: env.or_default_bool("REUSE_ONLY", defaults.reuse_only),
            allow_multiple_active: env
                .or_default_bool("ALLOW_MULTIPLE_ACTIVE", defaults.allow_multiple_active),
            cleanup_all_others: env
                .or_default_bool("CLEANUP_ALL_OTHERS", defaults.cleanup_all_others),
            fix_name_mismatch: env.or_default_bool("FIX_NAME_MISMATCH", defaults.fix_name_mismatch),
            stale_recreate: env.or_default_bool("STALE_RECREATE", defaults.stale_recreate),
            dry_run: env.or_default_bool("DRY_RUN", defaults.dry_run),
            prune_max_attempts: env.or_default("PRUNE_MAX_ATTEMPTS", DEFAULT_PRUNE_MAX_ATTEMPTS),
            azure_auth,
            azure_client_id: env.optional("AZURE_CLIENT_ID"),
            log_level: env.or_default_str("LOG_LEVEL", &defaults.log_level),
            log_format,
            metrics_textfile: env.optional("METRICS_TEXTFILE").map(PathBuf::from),
        })
    }

    /// Override the target from CLI flags
    ///
    /// # Errors
    ///
    /// Returns [`TokenManagerError::Config`] for an unrecognised `--output-mode`.
    pub fn apply_target(&mut self, target: &TargetArgs) -> Result<()> {
        if let Some(instance_name) = &target.instance_name {
            self.instance_name.clone_from(instance_name);
        }
        if let Some(service_account) = &target.service_account {
            self.service_account_name = Some(service_account.clone());
        }
        if let Some(output_mode) = &target.output_mode {
            self.output_mode = output_mode.parse()?;
        }
        Ok(())
    }

    /// Override switches and target from `reconcile` flags.
    ///
    /// A flag that is absent keeps the environment value.
    ///
    /// # Errors
    ///
    /// See [`Settings::apply_target`].
    pub fn apply_cli(&mut self, args: &ReconcileArgs) -> Result<()> {
        self.apply_target(&args.target)?;
        self.rotate |= args.rotate;
        self.reuse_only |= args.reuse_only;
        self.allow_multiple_active |= args.allow_multiple_active;
        self.dry_run |= args.dry_run;
        if args.no_cleanup {
            self.cleanup_all_others = false;
        }
        if args.no_fix_name_mismatch {
            self.fix_name_mismatch = false;
        }
        if args.no_stale_recreate {
            self.stale_recreate = false;
        }
        if let Some(ttl) = &args.ttl {
            self.token_ttl.clone_from(ttl);
        }
        Ok(())
    }

    /// Reject configurations that cannot work, before touching any backend
    ///
    /// # Errors
    ///
    /// [`TokenManagerError::Config`] or [`TokenManagerError::InvalidSecretName`]
    pub fn validate(&self) -> Result<()> {
        if self.instance_name.trim().is_empty() {
            return Err(TokenManagerError::Config(
                "GRAFANA_INSTANCE_NAME is required".to_string(),
            ));
        }

        validate_service_account_name(&self.service_account_name())
            .map_err(|e| TokenManagerError::Config(e.to_string()))?;

        if self.service_account_role.trim().is_empty() {
            return Err(TokenManagerError::Config(
                "GRAFANA_SERVICE_ACCOUNT_ROLE must not be empty".to_string(),
            ));
        }

        self.token_ttl()?;

        for name in [&self.token_secret_name, &self.token_name_secret_name] {
            validate_key_vault_secret_name(name).map_err(|e| {
                TokenManagerError::InvalidSecretName {
                    name: name.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        if self.token_secret_name == self.token_name_secret_name {
            return Err(TokenManagerError::Config(format!(
                "TOKEN_SECRET_NAME and TOKEN_NAME_SECRET_NAME must differ (both '{}')",
                self.token_secret_name
            )));
        }

        if self.output_mode == OutputMode::KeyVault && self.key_vault_name.is_none() {
            return Err(TokenManagerError::Config(
                "KEY_VAULT_NAME is required when OUTPUT_MODE is keyvault".to_string(),
            ));
        }

        if self.endpoint.is_none() && self.resource_ref().is_none() {
            return Err(TokenManagerError::Config(
                "Set GRAFANA_ENDPOINT, or AZURE_SUBSCRIPTION_ID and AZURE_RESOURCE_GROUP to look it up"
                    .to_string(),
            ));
        }

        if self.prune_max_attempts == 0 {
            return Err(TokenManagerError::Config(
                "PRUNE_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    #[must_use]
    pub fn service_account_name(&self) -> String {
        self.service_account_name.clone().unwrap_or_else(|| {
            format!(
                "{}-{DEFAULT_SERVICE_ACCOUNT_SUFFIX}",
                self.instance_name.trim()
            )
        })
    }

    #[must_use]
    pub fn service_account_spec(&self) -> ServiceAccountSpec {
        ServiceAccountSpec {
            name: self.service_account_name(),
            role: self.service_account_role.clone(),
        }
    }

    /// # Errors
    ///
    /// [`TokenManagerError::Config`] when `GRAFANA_TOKEN_TTL` does not parse
    pub fn token_ttl(&self) -> Result<Duration> {
        parse_duration(&self.token_ttl)
            .map_err(|e| TokenManagerError::Config(format!("GRAFANA_TOKEN_TTL: {e}")))
    }

    /// # Errors
    ///
    /// See [`Settings::token_ttl`].
    pub fn to_options(&self) -> Result<ReconcileOptions> {
        Ok(ReconcileOptions {
            rotate: self.rotate,
            reuse_only: self.reuse_only,
            allow_multiple_active: self.allow_multiple_active,
            cleanup_all_others: self.cleanup_all_others,
            fix_name_mismatch: self.fix_name_mismatch,
            stale_recreate: self.stale_recreate,
            dry_run: self.dry_run,
            token_ttl: self.token_ttl()?,
        })
    }

    #[must_use]
    pub fn secret_names(&self) -> SecretNames {
        SecretNames {
            value: self.token_secret_name.clone(),
            name: self.token_name_secret_name.clone(),
        }
    }

    #[must_use]
    pub fn prune_policy(&self) -> PrunePolicy {
        PrunePolicy {
            max_attempts: self.prune_max_attempts,
            ..PrunePolicy::default()
        }
    }

    /// ARM coordinates of the instance, when subscription and resource group are both known
    #[must_use]
    pub fn resource_ref(&self) -> Option<GrafanaResourceRef> {
        Some(GrafanaResourceRef {
            subscription_id: self.subscription_id.clone()?,
            resource_group: self.resource_group.clone()?,
            instance_name: self.instance_name.trim().to_string(),
        })
    }
}

/// Typed reads over a variable lookup; blank values count as unset
struct EnvReader<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<'_, F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn or_default<T: FromStr>(&self, key: &str, default: T) -> T {
        self.optional(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn or_default_bool(&self, key: &str, default: bool) -> bool {
        self.optional(key)
            .map(|v| {
                let v_lower = v.to_lowercase();
                v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
            })
            .unwrap_or(default)
    }

    fn or_default_str(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }
}
