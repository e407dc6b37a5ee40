//! # PMIG Common Library
//!
//! Shared code for the participant migrator:
//! - Error types
//! - Configuration loading (TOML + processing parameters)
//! - Migration event types and the event bus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
