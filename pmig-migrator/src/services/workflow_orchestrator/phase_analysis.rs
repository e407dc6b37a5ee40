//! Phase 1: ANALYZING
//!
//! Single pass over the participant stream. Produces the ordered row list and
//! the unique sets the creation phase needs. No remote calls are made here.

use super::statistics::AnalysisStats;
use super::WorkflowOrchestrator;
use crate::cache::business_key::{implementation_key, normalize_cct};
use crate::error::{MigrationError, MigrationResult};
use crate::models::raw_row::columns;
use crate::models::{
    ImplementationDescriptor, MigrationSession, ModalityConflict, RawRow, UniqueSets,
};
use crate::services::column_rules::{modality_column, normalize_header, ColumnLayout};
use std::collections::HashSet;
use std::io::Read;

/// Everything the analysis pass hands to the later phases
#[derive(Debug, Clone, Default)]
pub struct AnalysisOutput {
    /// Well-formed rows in input order
    pub rows: Vec<RawRow>,
    pub unique_sets: UniqueSets,
    /// Dynamic columns of the header set
    pub layout: ColumnLayout,
    pub conflicts: Vec<ModalityConflict>,
    pub stats: AnalysisStats,
}

/// Read a participant CSV stream
///
/// Headers are normalized and classified once. Records that cannot be parsed
/// (wrong field count, invalid UTF-8, every field blank) are logged and
/// skipped. A failure of the underlying reader rejects the whole stream.
pub fn analyze<R: Read>(input: R) -> MigrationResult<AnalysisOutput> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(input);

    let headers: Vec<String> = reader.headers()?.iter().map(normalize_header).collect();
    let layout = ColumnLayout::from_headers(&headers);

    let mut seen = HashSet::new();
    for header in &headers {
        if !seen.insert(header.as_str()) {
            tracing::warn!(
                column = %header,
                "Duplicate column after header normalization, keeping the first non-empty value"
            );
        }
    }

    let mut output = AnalysisOutput {
        layout,
        ..Default::default()
    };
    let mut reported_conflicts: HashSet<(String, String, String)> = HashSet::new();
    let mut record = csv::StringRecord::new();

    loop {
        match reader.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                if matches!(e.kind(), csv::ErrorKind::Io(_)) {
                    return Err(MigrationError::Input(e.to_string()));
                }
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                tracing::warn!(line, error = %e, "Skipping malformed row");
                output.stats.malformed_rows += 1;
                continue;
            }
        }

        let row_number = record.position().map(|p| p.line()).unwrap_or(0);
        if record.iter().all(|field| field.trim().is_empty()) {
            tracing::warn!(line = row_number, "Skipping blank row");
            output.stats.malformed_rows += 1;
            continue;
        }

        let row = RawRow::from_pairs(
            row_number,
            headers.iter().map(String::as_str).zip(record.iter()),
        );
        extract_row(&row, &mut output, &mut reported_conflicts);
        output.rows.push(row);
    }

    let sets = &output.unique_sets;
    output.stats.total_rows = output.rows.len();
    output.stats.programs = sets.programs.len();
    output.stats.implementations = sets.implementations.len();
    output.stats.ccts = sets.ccts.len();
    output.stats.attendance_fields = sets.attendance_fields.len();
    output.stats.work_fields = sets.work_fields.len();
    output.stats.modality_conflicts = output.conflicts.len();

    Ok(output)
}

/// Implementation business key of a row, if name, cycle and period are present
pub fn row_implementation_key(row: &RawRow) -> Option<String> {
    let name = row.value(columns::IMPLEMENTATION)?;
    let cycle = row.value(columns::CYCLE)?;
    let period = row.value(columns::PERIOD)?;
    Some(implementation_key(name, cycle, period))
}

fn extract_row(
    row: &RawRow,
    output: &mut AnalysisOutput,
    reported_conflicts: &mut HashSet<(String, String, String)>,
) {
    let sets = &mut output.unique_sets;

    if let Some(cct) = row.value(columns::CCT) {
        sets.ccts.insert(normalize_cct(cct));
    }

    let program = row.value(columns::PROGRAM).map(str::to_string);
    if let Some(name) = &program {
        sets.programs.insert(name.clone());
    }

    let Some(impl_key) = row_implementation_key(row) else {
        output.stats.rows_without_implementation += 1;
        return;
    };

    sets.add_implementation(
        &impl_key,
        ImplementationDescriptor {
            name: row.text(columns::IMPLEMENTATION),
            cycle: row.text(columns::CYCLE),
            period: row.text(columns::PERIOD),
            program,
        },
    );

    for field in &output.layout.attendance_fields {
        if row.value(field).is_some() {
            sets.observe_attendance(&impl_key, field);
        }

        if !output.layout.has_modality(field) {
            continue;
        }
        let Some(modality) = row.value(&modality_column(field)) else {
            continue;
        };
        if let Some(kept) = sets.record_modality(&impl_key, field, modality) {
            let signature = (impl_key.clone(), field.clone(), modality.to_string());
            if reported_conflicts.insert(signature) {
                tracing::warn!(
                    implementation = %impl_key,
                    field = %field,
                    kept = %kept,
                    rejected = %modality,
                    line = row.row_number,
                    "Conflicting modality, keeping first value"
                );
                output.conflicts.push(ModalityConflict {
                    implementation_key: impl_key.clone(),
                    field: field.clone(),
                    kept,
                    rejected: modality.to_string(),
                    row_number: row.row_number,
                });
            }
        }
    }

    for field in &output.layout.work_fields {
        if row.value(field).is_some() {
            sets.observe_work(&impl_key, field);
        }
    }
}

impl WorkflowOrchestrator {
    /// Phase 1: ANALYZING - parse and index the participant stream
    pub(super) fn phase_analyzing<R: Read>(
        &self,
        session: &MigrationSession,
        input: R,
    ) -> MigrationResult<AnalysisOutput> {
        tracing::info!(run_id = %session.run_id, "Phase 1: ANALYZING");

        let output = analyze(input)?;

        tracing::info!(
            run_id = %session.run_id,
            ccts = output.stats.ccts,
            attendance_fields = output.stats.attendance_fields,
            work_fields = output.stats.work_fields,
            "Analysis complete: {}",
            output.stats.display_string()
        );

        Ok(output)
    }
}
