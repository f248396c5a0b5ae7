//! # Grafana Token Manager
//!
//! Keeps exactly one valid API token for an Azure Managed Grafana service
//! account and the matching (name, value) pair in a secret store, so pipelines
//! can call the Grafana API without minting a new token on every run.
//!
//! - [`reconciler`]: the decision engine
//! - [`provider`]: Grafana, Key Vault and pipeline-variable backends
//! - [`config`]: environment and CLI settings

pub mod backoff;
pub mod cli;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod model;
pub mod observability;
pub mod provider;
pub mod reconciler;
pub mod validation;
