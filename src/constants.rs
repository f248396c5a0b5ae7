//! # Constants
//!
//! Shared constants used throughout the token manager.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default token time-to-live when `GRAFANA_TOKEN_TTL` is not set
pub const DEFAULT_TOKEN_TTL: &str = "90d";

/// Default Grafana role granted to the managed service account
pub const DEFAULT_SERVICE_ACCOUNT_ROLE: &str = "Admin";

/// Suffix appended to the instance name when no service account name is configured
pub const DEFAULT_SERVICE_ACCOUNT_SUFFIX: &str = "automation";

/// Default Key Vault secret holding the token value
pub const DEFAULT_TOKEN_SECRET_NAME: &str = "grafana-sa-token";

/// Default Key Vault secret holding the token name
pub const DEFAULT_TOKEN_NAME_SECRET_NAME: &str = "grafana-sa-token-name";

/// Maximum number of list/delete passes the pruner makes before giving up
pub const DEFAULT_PRUNE_MAX_ATTEMPTS: u32 = 5;

/// First delay between prune passes (seconds)
pub const DEFAULT_PRUNE_BACKOFF_MIN_SECS: u64 = 1;

/// Upper bound for the delay between prune passes (seconds)
pub const DEFAULT_PRUNE_BACKOFF_MAX_SECS: u64 = 5;

/// `chrono` format of the UTC timestamp embedded in token names.
/// Fixed width, so lexicographic order equals chronological order.
pub const TOKEN_NAME_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Seconds waited for a fresh token name before creation is given up
pub const TOKEN_NAME_ATTEMPTS: u32 = 3;

/// Entra ID audience of Azure Managed Grafana
pub const AZURE_MANAGED_GRAFANA_SCOPE: &str = "ce34e7e5-485f-4d76-964f-b3d2b16d1e4f/.default";

/// Azure Resource Manager scope
pub const AZURE_RESOURCE_MANAGER_SCOPE: &str = "https://management.azure.com/.default";

/// Azure Resource Manager base URL
pub const AZURE_RESOURCE_MANAGER_ENDPOINT: &str = "https://management.azure.com";

/// API version of the `Microsoft.Dashboard/grafana` resource provider
pub const AZURE_GRAFANA_API_VERSION: &str = "2023-09-01";

/// Maximum length of an Azure Key Vault secret name
pub const MAX_KEY_VAULT_SECRET_NAME_LEN: usize = 127;
