//! # Token Reconciler
//!
//! Decides, from the live tokens of a service account and the credential held
//! in the secret store, whether to reuse, create, rotate or repair, then makes
//! the backend match that decision.
//!
//! One run is sequential and assumes no other run touches the same service
//! account concurrently; serialise runs outside this process (for example with
//! pipeline exclusive locks).

mod engine;
mod prune;
mod status;
mod types;

pub use engine::TokenReconciler;
pub use prune::{PrunePolicy, PruneReport};
pub use status::{StatusReport, TokenState};
pub use types::{ReconcileActions, ReconcileOptions, ReconcileOutcome, ReconcileStatus, SecretNames};
