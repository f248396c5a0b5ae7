//! # Configuration
//!
//! Process settings from environment variables and CLI flags.

pub mod settings;

pub use settings::{OutputMode, Settings};
