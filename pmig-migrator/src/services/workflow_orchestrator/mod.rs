//! Migration workflow orchestrator
//!
//! Coordinates one migration run through all states
//!
//! # State Progression
//! ANALYZING → CREATING → BATCHING → DONE
//!
//! Each state is handled by a dedicated phase module:
//!
//! - **ANALYZING** (`phase_analysis`): single pass over the participant CSV,
//!   builds the row list and unique sets
//! - **CREATING** (`phase_creation`): surveys, CCTs, programs,
//!   implementations and their dependents
//! - **BATCHING** (`phase_batch`): participants, participations, satellite
//!   records and emails, per row
//!
//! An error in ANALYZING or CREATING moves the run to FAILED. Row errors in
//! BATCHING are collected and the run still reaches DONE.

use crate::cache::IdentityCache;
use crate::error::{MigrationError, MigrationResult};
use crate::models::{MigrationReport, MigrationSession};
use crate::services::entity_resolver::EntityResolver;
use crate::store::RemoteStore;
use chrono::Utc;
use pmig_common::config::ProcessingConfig;
use pmig_common::events::{EventBus, MigrationEvent, MigrationState};
use std::io::Read;
use std::sync::Arc;

mod phase_analysis;
mod phase_batch;
mod phase_creation;
pub mod statistics;

pub use phase_analysis::{analyze, row_implementation_key, AnalysisOutput};
pub use phase_batch::BatchOutput;
pub use phase_creation::parse_reference;

/// Workflow orchestrator service
pub struct WorkflowOrchestrator {
    store: Arc<dyn RemoteStore>,
    config: ProcessingConfig,
    event_bus: EventBus,
}

impl WorkflowOrchestrator {
    /// Create new workflow orchestrator
    ///
    /// # Arguments
    /// * `store` - Remote content store
    /// * `config` - Processing configuration (validated here, never mutated)
    /// * `event_bus` - Event bus for progress updates
    pub fn new(
        store: Arc<dyn RemoteStore>,
        config: ProcessingConfig,
        event_bus: EventBus,
    ) -> MigrationResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            event_bus,
        })
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Execute a complete migration run
    ///
    /// Returns the report of a run that reached DONE. An analysis or creation
    /// failure is returned as the error after the run is marked FAILED.
    pub async fn execute_migration<R: Read>(
        &self,
        participants: R,
        reference: Option<&mut dyn Read>,
    ) -> MigrationResult<MigrationReport> {
        let mut session = MigrationSession::new();
        let run_id = session.run_id;

        tracing::info!(
            run_id = %run_id,
            store = self.store.name(),
            mode = %self.config.process_mode,
            "Starting migration run"
        );
        self.event_bus.emit_lossy(MigrationEvent::RunStarted {
            run_id,
            timestamp: Utc::now(),
        });

        let cache = IdentityCache::new();
        let resolver = EntityResolver::new(self.store.as_ref(), &cache, self.config.omit_get);

        // ANALYZING
        let analysis = match self.phase_analyzing(&session, participants) {
            Ok(analysis) => analysis,
            Err(e) => return Err(self.handle_failure(&mut session, e)),
        };

        // CREATING
        self.transition(&mut session, MigrationState::Creating);
        let creation = match self
            .execute_creation(run_id, &resolver, &analysis.unique_sets, reference)
            .await
        {
            Ok(creation) => creation,
            Err(e) => return Err(self.handle_failure(&mut session, e)),
        };

        // BATCHING
        self.transition(&mut session, MigrationState::Batching);
        let batch = self
            .execute_batch(run_id, &resolver, &analysis.layout, &analysis.rows)
            .await;

        self.transition(&mut session, MigrationState::Done);
        let duration_ms = (Utc::now() - session.started_at).num_milliseconds().max(0) as u64;

        self.event_bus.emit_lossy(MigrationEvent::RunCompleted {
            run_id,
            total_records: batch.summary.total_records,
            success_count: batch.summary.success_count,
            error_count: batch.summary.error_count,
            duration_ms,
            timestamp: Utc::now(),
        });
        tracing::info!(
            run_id = %run_id,
            total = batch.summary.total_records,
            succeeded = batch.summary.success_count,
            failed = batch.summary.error_count,
            duration_ms,
            "Migration run complete"
        );

        Ok(MigrationReport {
            run_id,
            state: session.state,
            started_at: session.started_at,
            ended_at: session.ended_at,
            analysis: analysis.stats,
            creation,
            summary: batch.summary,
            errors: batch.errors,
            cache: cache.stats(),
        })
    }

    fn transition(&self, session: &mut MigrationSession, new_state: MigrationState) {
        let transition = session.transition_to(new_state);
        tracing::debug!(
            run_id = %session.run_id,
            from = ?transition.old_state,
            to = ?transition.new_state,
            "State transition"
        );
        self.event_bus.emit_lossy(MigrationEvent::StateChanged {
            run_id: session.run_id,
            old_state: transition.old_state,
            new_state: transition.new_state,
            timestamp: transition.transitioned_at,
        });
    }

    /// Mark the run FAILED and hand the error back
    fn handle_failure(
        &self,
        session: &mut MigrationSession,
        error: MigrationError,
    ) -> MigrationError {
        let failed_in = session.state;
        tracing::error!(
            run_id = %session.run_id,
            state = ?failed_in,
            error = %error,
            "Migration run failed"
        );

        self.transition(session, MigrationState::Failed);
        self.event_bus.emit_lossy(MigrationEvent::RunFailed {
            run_id: session.run_id,
            state: failed_in,
            error: error.to_string(),
            timestamp: Utc::now(),
        });

        error
    }
}
