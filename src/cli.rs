//! # CLI
//!
//! Command-line surface. Every flag overrides the matching environment
//! variable; anything left unset falls back to the environment.
//!
//! ```bash
//! # Reconcile (the default command)
//! grafana-token-manager
//! grafana-token-manager reconcile --rotate
//! grafana-token-manager reconcile --reuse-only --output-mode keyvault
//!
//! # Inspect without changing anything
//! grafana-token-manager status
//! ```

use clap::{Args, Parser, Subcommand};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("BUILD_GIT_HASH"),
    ", built ",
    env!("BUILD_DATETIME"),
    ")"
);

/// Keep one valid Grafana service-account token and its stored copy in sync
#[derive(Parser, Debug, Default)]
#[command(name = "grafana-token-manager", version = VERSION, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create, reuse, rotate or repair the token (default)
    Reconcile(ReconcileArgs),
    /// Show the account's tokens and whether the stored credential links to one
    Status(TargetArgs),
}

impl Cli {
    /// The requested command, `reconcile` when none was given
    #[must_use]
    pub fn command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or_else(|| Command::Reconcile(ReconcileArgs::default()))
    }
}

/// Which instance, account and store to work on
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Azure Managed Grafana instance name
    #[arg(long)]
    pub instance_name: Option<String>,

    /// Service account name (default `<instance>-automation`)
    #[arg(long)]
    pub service_account: Option<String>,

    /// Where the credential is stored: secret-variable or keyvault
    #[arg(long)]
    pub output_mode: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
#[allow(
    clippy::struct_excessive_bools,
    reason = "Each flag maps to one operator switch"
)]
pub struct ReconcileArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Always create a new token
    #[arg(long)]
    pub rotate: bool,

    /// Never create a token; fail when there is nothing to reuse
    #[arg(long)]
    pub reuse_only: bool,

    /// Keep every active token
    #[arg(long)]
    pub allow_multiple_active: bool,

    /// Leave extra active tokens alone unless a token is created
    #[arg(long)]
    pub no_cleanup: bool,

    /// Keep a stored name that matches no active token
    #[arg(long)]
    pub no_fix_name_mismatch: bool,

    /// Do not recreate when the stored value has no active token behind it
    #[arg(long)]
    pub no_stale_recreate: bool,

    /// Log every mutation instead of performing it
    #[arg(long)]
    pub dry_run: bool,

    /// Lifetime of new tokens, e.g. 90d, 12h
    #[arg(long)]
    pub ttl: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_reconcile() {
        let cli = Cli::try_parse_from(["grafana-token-manager"]).unwrap();
        assert!(matches!(cli.command(), Command::Reconcile(args) if !args.rotate));
    }

    #[test]
    fn test_reconcile_flags() {
        let cli = Cli::try_parse_from([
            "grafana-token-manager",
            "reconcile",
            "--rotate",
            "--no-cleanup",
            "--dry-run",
            "--ttl",
            "30d",
            "--instance-name",
            "grafana-prod",
        ])
        .unwrap();
        let Command::Reconcile(args) = cli.command() else {
            panic!("expected reconcile");
        };
        assert!(args.rotate);
        assert!(args.no_cleanup);
        assert!(args.dry_run);
        assert!(!args.reuse_only);
        assert_eq!(args.ttl.as_deref(), Some("30d"));
        assert_eq!(args.target.instance_name.as_deref(), Some("grafana-prod"));
    }

    #[test]
    fn test_status_command() {
        let cli = Cli::try_parse_from([
            "grafana-token-manager",
            "status",
            "--output-mode",
            "keyvault",
        ])
        .unwrap();
        let Command::Status(target) = cli.command() else {
            panic!("expected status");
        };
        assert_eq!(target.output_mode.as_deref(), Some("keyvault"));
    }
}
