//! Error types for pmig-migrator
//!
//! Failure classes:
//! - row-structural: logged during analysis, never surfaced as an error value
//! - dependency-missing: logged during creation, entity skipped
//! - critical-identity: [`MigrationError::MissingId`], fails one row
//! - remote-store: [`MigrationError::Store`], fails a row or aborts creation

use crate::cache::EntityType;
use crate::store::StoreError;
use thiserror::Error;

/// Migration error type
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The input stream itself failed (I/O on the underlying reader)
    #[error("Input stream error: {0}")]
    Input(String),

    /// Remote store call failed
    #[error("Remote store error: {0}")]
    Store(#[from] StoreError),

    /// Id needed by a row is not present in the identity cache
    #[error("Missing {entity} id for key '{key}'")]
    MissingId { entity: EntityType, key: String },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// pmig-common error
    #[error("Common error: {0}")]
    Common(#[from] pmig_common::Error),
}

impl MigrationError {
    /// True for errors that mean creation coverage was incomplete for a row
    pub fn is_critical_identity(&self) -> bool {
        matches!(self, MigrationError::MissingId { .. })
    }
}

impl From<csv::Error> for MigrationError {
    fn from(err: csv::Error) -> Self {
        MigrationError::Input(err.to_string())
    }
}

/// Result type for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;
