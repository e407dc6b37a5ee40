//! Phase 3: BATCHING
//!
//! Rows are processed in chunks of `batch_size`, sequentially or with every
//! row of a chunk dispatched concurrently. A row fails only when its
//! participant or participation cannot be established; satellite records and
//! emails are best-effort and tallied separately.

use super::phase_analysis::row_implementation_key;
use super::WorkflowOrchestrator;
use crate::cache::business_key::{cct_key, dependent_key, participant_key, survey_key};
use crate::cache::EntityType;
use crate::error::{MigrationError, MigrationResult};
use crate::models::raw_row::columns;
use crate::models::{BatchSummary, ErrorRecord, RawRow, RowOutcome, SatelliteReport};
use crate::services::column_rules::ColumnLayout;
use crate::services::entity_resolver::EntityResolver;
use crate::store::{Collection, Filter, RemoteId, RemoteStore};
use chrono::Utc;
use futures::future::join_all;
use pmig_common::config::ProcessMode;
use pmig_common::events::MigrationEvent;
use serde_json::{json, Value};
use std::time::Instant;
use uuid::Uuid;

/// Batch phase result
#[derive(Debug, Clone, Default)]
pub struct BatchOutput {
    pub summary: BatchSummary,
    pub errors: Vec<ErrorRecord>,
    pub outcomes: Vec<RowOutcome>,
}

/// Satellite create prepared from one row
struct SatelliteTask {
    label: String,
    collection: Collection,
    payload: Value,
}

/// Running tally across chunks
struct BatchTally {
    run_id: Uuid,
    chunk_size: usize,
    output: BatchOutput,
    processed: usize,
    last_reported: usize,
}

impl BatchTally {
    fn new(run_id: Uuid, chunk_size: usize, total: usize) -> Self {
        Self {
            run_id,
            chunk_size: chunk_size.max(1),
            output: BatchOutput {
                summary: BatchSummary {
                    total_records: total,
                    ..Default::default()
                },
                ..Default::default()
            },
            processed: 0,
            last_reported: 0,
        }
    }

    fn record(
        &mut self,
        orchestrator: &WorkflowOrchestrator,
        row: &RawRow,
        result: MigrationResult<RowOutcome>,
    ) {
        self.processed += 1;
        let summary = &mut self.output.summary;

        match result {
            Ok(outcome) => {
                summary.success_count += 1;
                summary.satellite_attempted += outcome.satellites.attempted;
                summary.satellite_failures += outcome.satellites.failed();
                self.output.outcomes.push(outcome);
            }
            Err(e) => {
                summary.error_count += 1;
                let record = ErrorRecord {
                    participant_id: row.external_id().unwrap_or_default().to_string(),
                    email: row.email().unwrap_or_default().to_string(),
                    error: e.to_string(),
                    row_number: row.row_number,
                };
                tracing::warn!(
                    run_id = %self.run_id,
                    row_number = record.row_number,
                    participant = %record.participant_id,
                    critical = e.is_critical_identity(),
                    error = %record.error,
                    "Row failed"
                );
                orchestrator.event_bus.emit_lossy(MigrationEvent::RowFailed {
                    run_id: self.run_id,
                    row_number: record.row_number,
                    participant_id: record.participant_id.clone(),
                    error: record.error.clone(),
                    timestamp: Utc::now(),
                });
                self.output.errors.push(record);
            }
        }
    }

    /// Report once per `chunk_size` processed rows, and at the end
    fn maybe_report(&mut self, orchestrator: &WorkflowOrchestrator) {
        let total = self.output.summary.total_records;
        let crossed = self.processed / self.chunk_size > self.last_reported / self.chunk_size;
        if !crossed && self.processed < total {
            return;
        }
        if self.processed == self.last_reported {
            return;
        }
        self.last_reported = self.processed;

        let summary = &self.output.summary;
        tracing::info!(
            run_id = %self.run_id,
            processed = self.processed,
            total,
            succeeded = summary.success_count,
            failed = summary.error_count,
            "Batch progress"
        );
        orchestrator.event_bus.emit_lossy(MigrationEvent::BatchProgress {
            run_id: self.run_id,
            processed: self.processed,
            total,
            succeeded: summary.success_count,
            failed: summary.error_count,
            timestamp: Utc::now(),
        });
    }
}

impl WorkflowOrchestrator {
    /// Phase 3: BATCHING - per-row participant migration
    ///
    /// Never fails: row errors are collected into the output.
    pub async fn execute_batch(
        &self,
        run_id: Uuid,
        resolver: &EntityResolver<'_>,
        layout: &ColumnLayout,
        rows: &[RawRow],
    ) -> BatchOutput {
        let start = Instant::now();
        let config = &self.config;

        tracing::info!(
            run_id = %run_id,
            rows = rows.len(),
            batch_size = config.batch_size,
            mode = %config.process_mode,
            omit_get = config.omit_get,
            "Phase 3: BATCHING"
        );

        let mut tally = BatchTally::new(run_id, config.chunk_size, rows.len());

        for (batch_index, chunk) in rows.chunks(config.batch_size.max(1)).enumerate() {
            tracing::debug!(
                run_id = %run_id,
                batch = batch_index + 1,
                rows = chunk.len(),
                "Processing batch"
            );

            match config.process_mode {
                ProcessMode::Sequential => {
                    for row in chunk {
                        let result = self.process_row(resolver, layout, row).await;
                        tally.record(self, row, result);
                        tally.maybe_report(self);
                    }
                }
                ProcessMode::Parallel => {
                    let results = join_all(
                        chunk
                            .iter()
                            .map(|row| self.process_row(resolver, layout, row)),
                    )
                    .await;
                    for (row, result) in chunk.iter().zip(results) {
                        tally.record(self, row, result);
                    }
                    tally.maybe_report(self);
                }
            }

            tally.output.summary.batches += 1;
        }

        let mut output = tally.output;
        output.summary.processing_time_ms = start.elapsed().as_millis() as u64;

        tracing::info!(
            run_id = %run_id,
            total = output.summary.total_records,
            succeeded = output.summary.success_count,
            failed = output.summary.error_count,
            satellite_failures = output.summary.satellite_failures,
            elapsed_ms = output.summary.processing_time_ms,
            "Batch phase complete"
        );

        output
    }

    /// Migrate one participant row
    pub async fn process_row(
        &self,
        resolver: &EntityResolver<'_>,
        layout: &ColumnLayout,
        row: &RawRow,
    ) -> MigrationResult<RowOutcome> {
        let implementation_key = row_implementation_key(row);
        let implementation_id = implementation_key
            .as_deref()
            .and_then(|key| resolver.cached(EntityType::Implementation, key));
        let cct_id = row
            .value(columns::CCT)
            .and_then(|code| resolver.cached(EntityType::Cct, &cct_key(code)));

        let external_id = row.external_id().ok_or_else(|| MigrationError::MissingId {
            entity: EntityType::Participant,
            key: format!("row {} has no external id", row.row_number),
        })?;
        let participant = resolver
            .get_or_create(
                EntityType::Participant,
                &Filter::eq("id_externo", external_id),
                participant_payload(row, external_id, cct_id),
                &participant_key(external_id),
            )
            .await?;

        let implementation_id = implementation_id.ok_or_else(|| MigrationError::MissingId {
            entity: EntityType::Implementation,
            key: implementation_key.unwrap_or_default(),
        })?;

        let store = resolver.store();
        let (participation_id, participation_reused) =
            ensure_participation(store, resolver.omit_get(), participant.id, implementation_id)
                .await?;

        let tasks = satellite_tasks(resolver, layout, row, participation_id, implementation_id);
        let (mut satellites, email) = tokio::join!(
            dispatch_satellites(store, tasks),
            handle_email(store, resolver.omit_get(), participant.id, row.email())
        );
        satellites.merge(email);

        for failure in &satellites.failures {
            tracing::warn!(
                row_number = row.row_number,
                participant = %external_id,
                failure = %failure,
                "Satellite record failed"
            );
        }

        Ok(RowOutcome {
            row_number: row.row_number,
            participant_id: participant.id,
            participation_id,
            participation_reused,
            satellites,
        })
    }
}

fn participant_payload(row: &RawRow, external_id: &str, cct_id: Option<RemoteId>) -> Value {
    json!({
        "id_externo": external_id,
        "nombre": row.text(columns::FIRST_NAME),
        "apellido_paterno": row.text(columns::PATERNAL_SURNAME),
        "apellido_materno": row.text(columns::MATERNAL_SURNAME),
        "sexo": row.text(columns::SEX),
        "edad": row.text(columns::AGE),
        "curp": row.text(columns::CURP),
        "telefono": row.text(columns::PHONE),
        "rol": row.text(columns::ROLE),
        "cct": cct_id,
    })
}

/// Participation id for the pair, and whether it already existed
async fn ensure_participation(
    store: &dyn RemoteStore,
    omit_get: bool,
    participant_id: RemoteId,
    implementation_id: RemoteId,
) -> MigrationResult<(RemoteId, bool)> {
    if !omit_get {
        let lookup = Filter::eq("participante", participant_id)
            .and("implementacion", implementation_id);
        if let Some(id) = store.find(Collection::Participations, &lookup).await? {
            return Ok((id, true));
        }
    }

    let id = store
        .create(
            Collection::Participations,
            json!({ "participante": participant_id, "implementacion": implementation_id }),
        )
        .await?;
    Ok((id, false))
}

/// Satellite creates for one row
///
/// A dependent id missing from the cache is returned as a failed task.
fn satellite_tasks(
    resolver: &EntityResolver<'_>,
    layout: &ColumnLayout,
    row: &RawRow,
    participation_id: RemoteId,
    implementation_id: RemoteId,
) -> Vec<Result<SatelliteTask, String>> {
    let mut tasks = Vec::new();

    let minutes = row.value(columns::APP_MINUTES);
    let downloaded = row.value(columns::APP_DOWNLOAD);
    if minutes.is_some() || downloaded.is_some() {
        tasks.push(Ok(SatelliteTask {
            label: "app usage".to_string(),
            collection: Collection::AppUsages,
            payload: json!({
                "participacion": participation_id,
                "minutos": minutes.and_then(|m| m.parse::<f64>().ok()),
                "descargo": row.flag(columns::APP_DOWNLOAD),
            }),
        }));
    }

    for field in &layout.module_fields {
        let Some(progress) = row.value(field) else {
            continue;
        };
        let label = format!("module progress {}", field);
        let key = dependent_key(field, implementation_id);
        tasks.push(
            match resolver.cached(EntityType::Module, &key) {
                Some(module_id) => Ok(SatelliteTask {
                    label,
                    collection: Collection::ModuleProgress,
                    payload: json!({
                        "participacion": participation_id,
                        "modulo": module_id,
                        "avance": progress,
                    }),
                }),
                None => Err(format!("{}: module not created", label)),
            },
        );
    }

    for field in &layout.survey_fields {
        if !row.flag(field) {
            continue;
        }
        let label = format!("survey completion {}", field);
        tasks.push(match resolver.cached(EntityType::Survey, &survey_key(field)) {
            Some(survey_id) => Ok(SatelliteTask {
                label,
                collection: Collection::SurveyCompletions,
                payload: json!({
                    "participacion": participation_id,
                    "encuesta": survey_id,
                    "completada": true,
                }),
            }),
            None => Err(format!("{}: survey not created", label)),
        });
    }

    for field in &layout.attendance_fields {
        let Some(value) = row.value(field) else {
            continue;
        };
        let label = format!("attendance {}", field);
        let key = dependent_key(field, implementation_id);
        tasks.push(
            match resolver.cached(EntityType::Attendance, &key) {
                Some(attendance_id) => Ok(SatelliteTask {
                    label,
                    collection: Collection::AttendanceRecords,
                    payload: json!({
                        "participacion": participation_id,
                        "asistencia": attendance_id,
                        "valor": value,
                    }),
                }),
                None => Err(format!("{}: attendance not created", label)),
            },
        );
    }

    for field in &layout.work_fields {
        let Some(value) = row.value(field) else {
            continue;
        };
        let label = format!("work {}", field);
        let key = dependent_key(field, implementation_id);
        tasks.push(
            match resolver.cached(EntityType::Work, &key) {
                Some(work_id) => Ok(SatelliteTask {
                    label,
                    collection: Collection::WorkCompletions,
                    payload: json!({
                        "participacion": participation_id,
                        "trabajo": work_id,
                        "valor": value,
                    }),
                }),
                None => Err(format!("{}: work item not created", label)),
            },
        );
    }

    tasks
}

async fn dispatch_satellites(
    store: &dyn RemoteStore,
    tasks: Vec<Result<SatelliteTask, String>>,
) -> SatelliteReport {
    let mut report = SatelliteReport::default();
    let mut ready = Vec::new();
    for task in tasks {
        match task {
            Ok(task) => ready.push(task),
            Err(failure) => report.record_failure(failure),
        }
    }

    let results = join_all(
        ready
            .iter()
            .map(|task| store.create(task.collection, task.payload.clone())),
    )
    .await;

    for (task, result) in ready.iter().zip(results) {
        match result {
            Ok(_) => report.record_success(),
            Err(e) => report.record_failure(format!("{}: {}", task.label, e)),
        }
    }

    report
}

async fn handle_email(
    store: &dyn RemoteStore,
    omit_get: bool,
    participant_id: RemoteId,
    email: Option<&str>,
) -> SatelliteReport {
    let mut report = SatelliteReport::default();
    let Some(email) = email else {
        return report;
    };

    let principal = if omit_get {
        true
    } else {
        let any = Filter::eq("participante", participant_id);
        let exact = Filter::eq("participante", participant_id).and("email", email);
        let (any, exact) = tokio::join!(
            store.find(Collection::ParticipantEmails, &any),
            store.find(Collection::ParticipantEmails, &exact)
        );
        match (any, exact) {
            (_, Ok(Some(_))) => return report,
            (Ok(existing), Ok(None)) => existing.is_none(),
            (Err(e), _) | (_, Err(e)) => {
                report.record_failure(format!("email lookup: {}", e));
                return report;
            }
        }
    };

    let payload = json!({
        "participante": participant_id,
        "email": email,
        "principal": principal,
    });
    match store.create(Collection::ParticipantEmails, payload).await {
        Ok(_) => report.record_success(),
        Err(e) => report.record_failure(format!("email: {}", e)),
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory_store::CallKind;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_email_principal_only_when_first() {
        let store = MemoryStore::new();

        let first = handle_email(&store, false, 1, Some("a@x.com")).await;
        let second = handle_email(&store, false, 1, Some("b@x.com")).await;
        let repeat = handle_email(&store, false, 1, Some("a@x.com")).await;

        assert_eq!(first.succeeded, 1);
        assert_eq!(second.succeeded, 1);
        assert_eq!(repeat.attempted, 0);

        let emails = store.records(Collection::ParticipantEmails);
        assert_eq!(emails.len(), 2);
        assert_eq!(emails[0]["principal"], true);
        assert_eq!(emails[1]["principal"], false);
    }

    #[tokio::test]
    async fn test_email_omit_get_creates_principal_without_lookup() {
        let store = MemoryStore::new();

        handle_email(&store, true, 1, Some("a@x.com")).await;
        handle_email(&store, true, 1, Some("a@x.com")).await;

        assert_eq!(store.call_count(CallKind::Find, Collection::ParticipantEmails), 0);
        let emails = store.records(Collection::ParticipantEmails);
        assert_eq!(emails.len(), 2);
        assert!(emails.iter().all(|e| e["principal"] == true));
    }

    #[tokio::test]
    async fn test_missing_email_is_not_attempted() {
        let store = MemoryStore::new();
        let report = handle_email(&store, false, 1, None).await;
        assert_eq!(report, SatelliteReport::default());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_participation_reused_unless_omit_get() {
        let store = MemoryStore::new();

        let (first, reused) = ensure_participation(&store, false, 1, 2).await.unwrap();
        assert!(!reused);
        let (again, reused) = ensure_participation(&store, false, 1, 2).await.unwrap();
        assert!(reused);
        assert_eq!(first, again);

        let (_, reused) = ensure_participation(&store, true, 1, 2).await.unwrap();
        assert!(!reused);
        assert_eq!(store.count(Collection::Participations), 2);
    }

    #[tokio::test]
    async fn test_satellite_failures_are_tallied() {
        let store = MemoryStore::new();
        store.fail_creates(Collection::WorkCompletions);

        let tasks = vec![
            Ok(SatelliteTask {
                label: "attendance asist_1".to_string(),
                collection: Collection::AttendanceRecords,
                payload: json!({ "participacion": 1 }),
            }),
            Ok(SatelliteTask {
                label: "work trabajo_1".to_string(),
                collection: Collection::WorkCompletions,
                payload: json!({ "participacion": 1 }),
            }),
            Err("module progress modulo_4: module not created".to_string()),
        ];

        let report = dispatch_satellites(&store, tasks).await;
        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed(), 2);
        assert!(report.failures.iter().any(|f| f.starts_with("work trabajo_1")));
    }
}
