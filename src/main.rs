//! # Grafana Token Manager
//!
//! Pipeline entry point: load settings, wire the Grafana client and the
//! secret store, run one reconciliation (or a status report) and exit.
//!
//! Logs go to stderr. Stdout carries only pipeline logging commands
//! (`secret-variable` mode) or the status report.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use azure_core::credentials::TokenCredential;
use clap::Parser;
use tracing::{error, info, warn};

use grafana_token_manager::cli::{Cli, Command};
use grafana_token_manager::clock::SystemClock;
use grafana_token_manager::config::{OutputMode, Settings};
use grafana_token_manager::error::{Result, TokenManagerError};
use grafana_token_manager::observability::{logging, metrics};
use grafana_token_manager::provider::azure::{build_credential, KeyVaultStore};
use grafana_token_manager::provider::grafana::endpoint::{lookup_endpoint, normalize_endpoint};
use grafana_token_manager::provider::grafana::{GrafanaAuth, GrafanaClient};
use grafana_token_manager::provider::pipeline::PipelineVariableStore;
use grafana_token_manager::provider::SecretStore;
use grafana_token_manager::reconciler::TokenReconciler;

#[tokio::main]
async fn main() -> ExitCode {
    // rustls 0.23 needs a process-wide provider before the first TLS handshake
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("error: failed to install rustls crypto provider");
        return ExitCode::FAILURE;
    }

    // A missing .env file is normal in pipelines
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let command = cli.command();

    let settings = match load_settings(&command) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    logging::init_logging(&settings.log_level, settings.log_format);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("BUILD_GIT_HASH"),
        built = env!("BUILD_DATETIME"),
        "Starting grafana-token-manager"
    );

    if let Err(e) = metrics::register_metrics() {
        warn!("Failed to register metrics: {e:#}");
    }

    let start = Instant::now();
    let result = run(&command, &settings).await;
    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
    if result.is_err() {
        metrics::increment_reconciliation_errors();
    }

    if let Some(path) = &settings.metrics_textfile {
        if let Err(e) = metrics::write_textfile(path) {
            warn!(path = %path.display(), "Failed to write metrics textfile: {e:#}");
        }
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Run failed");
            eprintln!("error: {e}");
            if e.is_precondition() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn load_settings(command: &Command) -> Result<Settings> {
    let mut settings = Settings::from_env()?;
    match command {
        Command::Reconcile(args) => settings.apply_cli(args)?,
        Command::Status(target) => settings.apply_target(target)?,
    }
    settings.validate()?;
    Ok(settings)
}

async fn run(command: &Command, settings: &Settings) -> Result<()> {
    let spec = settings.service_account_spec();
    let reconciler = build_reconciler(settings).await?;

    match command {
        Command::Reconcile(_) => {
            let options = settings.to_options()?;
            let outcome = reconciler.reconcile(&spec, &options).await?;
            metrics::increment_reconciliations(outcome.status.as_str());
            info!(
                status = %outcome.status,
                token_name = outcome.token_name.as_deref().unwrap_or("<none>"),
                expired_deleted = outcome.actions.expired_deleted,
                pruned = outcome.actions.pruned,
                name_repaired = outcome.actions.name_repaired,
                dry_run = outcome.dry_run,
                "Reconciliation finished"
            );
        }
        Command::Status(_) => {
            let report = reconciler.status(&spec).await?;
            println!("{report}");
        }
    }

    Ok(())
}

async fn build_reconciler(settings: &Settings) -> Result<TokenReconciler> {
    // Only build an Azure credential when something actually needs one
    let needs_credential = settings.api_token.is_none()
        || settings.endpoint.is_none()
        || settings.output_mode == OutputMode::KeyVault;
    let credential = if needs_credential {
        Some(build_credential(
            settings.azure_auth,
            settings.azure_client_id.as_deref(),
        )?)
    } else {
        None
    };

    let endpoint = match &settings.endpoint {
        Some(endpoint) => normalize_endpoint(endpoint),
        None => {
            let resource = settings.resource_ref().ok_or_else(|| {
                TokenManagerError::Config(
                    "AZURE_SUBSCRIPTION_ID and AZURE_RESOURCE_GROUP are required to look up the Grafana endpoint"
                        .to_string(),
                )
            })?;
            lookup_endpoint(&resource, require(&credential)?).await?
        }
    };

    let auth = match &settings.api_token {
        Some(token) => GrafanaAuth::Static(token.clone()),
        None => GrafanaAuth::Entra(Arc::clone(require(&credential)?)),
    };
    let grafana = Arc::new(GrafanaClient::new(&endpoint, auth)?);

    let secret_store: Arc<dyn SecretStore> = match settings.output_mode {
        OutputMode::SecretVariable => Arc::new(PipelineVariableStore::from_env()),
        OutputMode::KeyVault => {
            let vault_name = settings.key_vault_name.as_deref().ok_or_else(|| {
                TokenManagerError::Config("KEY_VAULT_NAME is required".to_string())
            })?;
            Arc::new(KeyVaultStore::new(
                vault_name,
                Arc::clone(require(&credential)?),
            )?)
        }
    };

    Ok(
        TokenReconciler::new(grafana, secret_store, Arc::new(SystemClock))
            .with_secret_names(settings.secret_names())
            .with_prune_policy(settings.prune_policy()),
    )
}

fn require(credential: &Option<Arc<dyn TokenCredential>>) -> Result<&Arc<dyn TokenCredential>> {
    credential
        .as_ref()
        .ok_or_else(|| TokenManagerError::Config("Azure credential not configured".to_string()))
}
