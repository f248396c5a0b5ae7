//! # Pipeline Secret Variables
//!
//! [`SecretStore`] for the `secret-variable` output mode: the credential is
//! handed to later pipeline steps as Azure Pipelines variables instead of
//! being written to Key Vault.
//!
//! Previous values are read from the step's environment (secret `grafana-sa-token`
//! is read from `GRAFANA_SA_TOKEN`); new values are published with
//! `##vso[task.setvariable ...]` logging commands on stdout.

use crate::provider::SecretStore;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use tracing::{debug, info};

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Azure Pipelines variable backed [`SecretStore`]
pub struct PipelineVariableStore {
    lookup: Lookup,
    out: Mutex<Box<dyn Write + Send>>,
    written: Mutex<HashMap<String, String>>,
}

impl std::fmt::Debug for PipelineVariableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineVariableStore").finish_non_exhaustive()
    }
}

/// `grafana-sa-token` -> `GRAFANA_SA_TOKEN`, the way Azure Pipelines maps variable names
#[must_use]
pub fn env_var_name(secret_name: &str) -> String {
    secret_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

impl PipelineVariableStore {
    /// Read from the process environment, publish on stdout
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(
            Box::new(|key: &str| std::env::var(key).ok()),
            Box::new(std::io::stdout()),
        )
    }

    #[must_use]
    pub fn new(lookup: Lookup, out: Box<dyn Write + Send>) -> Self {
        Self {
            lookup,
            out: Mutex::new(out),
            written: Mutex::new(HashMap::new()),
        }
    }
}

impl PipelineVariableStore {
    fn emit(&self, secret_name: &str, secret_value: &str, sensitive: bool) -> Result<()> {
        if secret_value.contains(['\n', '\r']) {
            return Err(anyhow::anyhow!(
                "Value for pipeline variable {secret_name} contains a line break"
            ));
        }

        {
            let mut out = self
                .out
                .lock()
                .map_err(|e| anyhow::anyhow!("Pipeline output poisoned: {e}"))?;
            writeln!(
                out,
                "##vso[task.setvariable variable={secret_name};issecret={sensitive}]{secret_value}"
            )?;
            out.flush()?;
        }

        self.written
            .lock()
            .map_err(|e| anyhow::anyhow!("Pipeline variable cache poisoned: {e}"))?
            .insert(secret_name.to_string(), secret_value.to_string());

        info!(
            "Published pipeline variable {} (secret: {})",
            secret_name, sensitive
        );
        Ok(())
    }
}

#[async_trait]
impl SecretStore for PipelineVariableStore {
    async fn get_secret(&self, secret_name: &str) -> Result<Option<String>> {
        if let Some(value) = self
            .written
            .lock()
            .map_err(|e| anyhow::anyhow!("Pipeline variable cache poisoned: {e}"))?
            .get(secret_name)
        {
            return Ok(Some(value.clone()));
        }

        let var = env_var_name(secret_name);
        let value = (self.lookup)(&var).filter(|v| !v.is_empty());
        debug!(
            "Pipeline variable {} is {}",
            var,
            if value.is_some() { "set" } else { "not set" }
        );
        Ok(value)
    }

    async fn set_secret(
        &self,
        secret_name: &str,
        secret_value: &str,
        sensitive: bool,
    ) -> Result<bool> {
        if self.get_secret(secret_name).await?.as_deref() == Some(secret_value) {
            debug!("Pipeline variable {} unchanged, skipping", secret_name);
            return Ok(false);
        }

        self.emit(secret_name, secret_value, sensitive)?;
        Ok(true)
    }

    /// Variables only live for the current job, so an unchanged value still has
    /// to be set for later steps. Skipped only when this run already set it.
    async fn publish(&self, secret_name: &str, secret_value: &str, sensitive: bool) -> Result<()> {
        let already_set = self
            .written
            .lock()
            .map_err(|e| anyhow::anyhow!("Pipeline variable cache poisoned: {e}"))?
            .get(secret_name)
            .is_some_and(|v| v == secret_value);
        if already_set {
            return Ok(());
        }
        self.emit(secret_name, secret_value, sensitive)
    }
}
