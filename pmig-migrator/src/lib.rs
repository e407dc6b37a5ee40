//! pmig-migrator library interface
//!
//! Migrates participant rows into a remote content store through a three-phase
//! pipeline (analysis → creation → batch) backed by a per-run identity cache.

pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use crate::cache::IdentityCache;
pub use crate::error::{MigrationError, MigrationResult};
pub use crate::services::WorkflowOrchestrator;
pub use crate::store::{Collection, RemoteStore};
