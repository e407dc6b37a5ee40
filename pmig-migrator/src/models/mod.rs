//! Data models for pmig-migrator

pub mod migration_result;
pub mod migration_session;
pub mod raw_row;
pub mod unique_sets;

pub use migration_result::{BatchSummary, ErrorRecord, MigrationReport, RowOutcome, SatelliteReport};
pub use migration_session::{MigrationSession, StateTransition};
pub use raw_row::RawRow;
pub use unique_sets::{ImplementationDescriptor, ModalityConflict, UniqueSets};
