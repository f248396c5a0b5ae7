//! # Validation
//!
//! Precondition checks run before any backend call.

pub mod duration;
pub mod names;

pub use duration::parse_duration;
pub use names::{validate_key_vault_secret_name, validate_service_account_name};
