//! Phase 2: CREATING
//!
//! Creates shared and parent entities before any row is processed:
//! 1. Surveys and CCT reference data (the two loads run concurrently)
//! 2. Programs
//! 3. Implementations
//! 4. Modules, attendances and work items of each cached implementation
//!
//! Steps 2-4 are strictly sequential. Any remote error aborts the phase.

use super::statistics::{CreationStats, EntityCounts};
use super::WorkflowOrchestrator;
use crate::cache::business_key::{
    cct_key, dependent_key, normalize_cct, program_key, survey_key,
};
use crate::cache::EntityType;
use crate::error::{MigrationError, MigrationResult};
use crate::models::raw_row::columns;
use crate::models::{RawRow, UniqueSets};
use crate::services::column_rules::{normalize_header, FIXED_MODULES, FIXED_SURVEYS};
use crate::services::entity_resolver::EntityResolver;
use crate::store::Filter;
use chrono::Utc;
use indexmap::IndexSet;
use pmig_common::events::MigrationEvent;
use serde_json::{json, Map, Value};
use std::io::Read;
use uuid::Uuid;

/// Parse the CCT reference stream into rows keyed by normalized column
///
/// Rows without a CCT code, or that cannot be parsed, are skipped.
pub fn parse_reference(input: &mut dyn Read) -> MigrationResult<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new().from_reader(input);
    let headers: Vec<String> = reader.headers()?.iter().map(normalize_header).collect();

    let mut rows = Vec::new();
    let mut record = csv::StringRecord::new();
    loop {
        match reader.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                if matches!(e.kind(), csv::ErrorKind::Io(_)) {
                    return Err(MigrationError::Input(e.to_string()));
                }
                tracing::warn!(error = %e, "Skipping malformed reference row");
                continue;
            }
        }

        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let row = RawRow::from_pairs(line, headers.iter().map(String::as_str).zip(record.iter()));
        if row.value(columns::CCT).is_none() {
            tracing::warn!(line, "Skipping reference row without CCT code");
            continue;
        }
        rows.push(row);
    }

    Ok(rows)
}

/// CCT create payload: the code plus every other non-empty reference column
fn cct_payload(code: &str, reference: Option<&RawRow>) -> Value {
    let mut payload = Map::new();
    if let Some(row) = reference {
        let mut names: Vec<&str> = row.columns().filter(|c| *c != columns::CCT).collect();
        names.sort_unstable();
        for name in names {
            if let Some(value) = row.value(name) {
                payload.insert(name.to_string(), Value::String(value.to_string()));
            }
        }
    }
    payload.insert("clave".to_string(), Value::String(code.to_string()));
    Value::Object(payload)
}

impl WorkflowOrchestrator {
    /// Phase 2: CREATING - create every parent and shared entity
    ///
    /// `reference` is an optional CCT reference CSV stream.
    pub async fn execute_creation(
        &self,
        run_id: Uuid,
        resolver: &EntityResolver<'_>,
        sets: &UniqueSets,
        reference: Option<&mut dyn Read>,
    ) -> MigrationResult<CreationStats> {
        tracing::info!(
            run_id = %run_id,
            programs = sets.programs.len(),
            implementations = sets.implementations.len(),
            "Phase 2: CREATING"
        );

        let reference_rows = match reference {
            Some(input) => parse_reference(input)?,
            None => Vec::new(),
        };

        let mut stats = CreationStats::default();

        // Step 1: independent loads
        let (surveys, ccts) = tokio::join!(
            self.preload_surveys(resolver),
            self.load_ccts(resolver, &reference_rows, &sets.ccts)
        );
        stats.surveys = surveys?;
        self.emit_step(run_id, "surveys", stats.surveys);
        stats.ccts = ccts?;
        self.emit_step(run_id, "ccts", stats.ccts);

        // Step 2: programs
        for name in &sets.programs {
            let resolution = resolver
                .get_or_create(
                    EntityType::Program,
                    &Filter::eq("nombre", name),
                    json!({ "nombre": name }),
                    &program_key(name),
                )
                .await?;
            stats.programs.record(&resolution);
        }
        self.emit_step(run_id, "programs", stats.programs);

        // Step 3: implementations
        let survey_ids: Vec<i64> = FIXED_SURVEYS
            .iter()
            .filter_map(|code| resolver.cached(EntityType::Survey, &survey_key(code)))
            .collect();

        for (key, descriptor) in &sets.implementations {
            let program_id = descriptor
                .program
                .as_deref()
                .and_then(|name| resolver.cached(EntityType::Program, &program_key(name)));

            let Some(program_id) = program_id else {
                tracing::warn!(
                    run_id = %run_id,
                    implementation = %key,
                    program = ?descriptor.program,
                    "Program id not resolved, skipping implementation"
                );
                stats.implementations.skipped += 1;
                continue;
            };

            let lookup = Filter::eq("nombre", &descriptor.name)
                .and("ciclo_escolar", &descriptor.cycle)
                .and("periodo", &descriptor.period);
            let payload = json!({
                "nombre": descriptor.name,
                "ciclo_escolar": descriptor.cycle,
                "periodo": descriptor.period,
                "programa": program_id,
                "encuestas": survey_ids,
            });

            let resolution = resolver
                .get_or_create(EntityType::Implementation, &lookup, payload, key)
                .await?;
            stats.implementations.record(&resolution);
        }
        self.emit_step(run_id, "implementations", stats.implementations);

        // Step 4: dependents, one implementation at a time
        for (key, implementation_id) in resolver.cache().entries(EntityType::Implementation) {
            self.create_dependents(resolver, sets, &key, implementation_id, &mut stats)
                .await?;
        }
        self.emit_step(run_id, "modules", stats.modules);
        self.emit_step(run_id, "attendances", stats.attendances);
        self.emit_step(run_id, "works", stats.works);

        let validation = resolver.cache().validate();
        if !validation.ok {
            for issue in &validation.issues {
                tracing::warn!(run_id = %run_id, issue = %issue, "Identity cache validation");
            }
        }
        stats.validation_issues = validation.issues;

        tracing::info!(run_id = %run_id, "Creation complete: {}", stats.display_string());

        Ok(stats)
    }

    async fn preload_surveys(
        &self,
        resolver: &EntityResolver<'_>,
    ) -> MigrationResult<EntityCounts> {
        let mut counts = EntityCounts::default();
        for code in FIXED_SURVEYS {
            let resolution = resolver
                .get_or_create(
                    EntityType::Survey,
                    &Filter::eq("clave", code),
                    json!({ "clave": code, "nombre": code }),
                    &survey_key(code),
                )
                .await?;
            counts.record(&resolution);
        }
        Ok(counts)
    }

    /// Reference CCTs first, then any code seen in the participant rows
    async fn load_ccts(
        &self,
        resolver: &EntityResolver<'_>,
        reference_rows: &[RawRow],
        observed: &IndexSet<String>,
    ) -> MigrationResult<EntityCounts> {
        let mut counts = EntityCounts::default();

        for row in reference_rows {
            let Some(code) = row.value(columns::CCT).map(normalize_cct) else {
                continue;
            };
            let key = cct_key(&code);
            let resolution = resolver
                .get_or_create(
                    EntityType::Cct,
                    &Filter::eq("clave", &code),
                    cct_payload(&code, Some(row)),
                    &key,
                )
                .await?;
            counts.record(&resolution);
        }

        for code in observed {
            let key = cct_key(code);
            if resolver.cached(EntityType::Cct, &key).is_some() {
                continue;
            }
            tracing::debug!(cct = %code, "CCT not in reference data, creating from code");
            let resolution = resolver
                .get_or_create(
                    EntityType::Cct,
                    &Filter::eq("clave", code),
                    cct_payload(code, None),
                    &key,
                )
                .await?;
            counts.record(&resolution);
        }

        Ok(counts)
    }

    async fn create_dependents(
        &self,
        resolver: &EntityResolver<'_>,
        sets: &UniqueSets,
        implementation_key: &str,
        implementation_id: i64,
        stats: &mut CreationStats,
    ) -> MigrationResult<()> {
        for module in FIXED_MODULES {
            let resolution = resolver
                .get_or_create(
                    EntityType::Module,
                    &Filter::eq("nombre", module).and("implementacion", implementation_id),
                    json!({ "nombre": module, "implementacion": implementation_id }),
                    &dependent_key(module, implementation_id),
                )
                .await?;
            stats.modules.record(&resolution);
        }

        for field in sets.attendance_for(implementation_key) {
            let modality = sets.modality(implementation_key, field);
            let resolution = resolver
                .get_or_create(
                    EntityType::Attendance,
                    &Filter::eq("clave", field).and("implementacion", implementation_id),
                    json!({
                        "clave": field,
                        "implementacion": implementation_id,
                        "modalidad": modality,
                    }),
                    &dependent_key(field, implementation_id),
                )
                .await?;
            stats.attendances.record(&resolution);
        }

        for field in sets.work_for(implementation_key) {
            let resolution = resolver
                .get_or_create(
                    EntityType::Work,
                    &Filter::eq("clave", field).and("implementacion", implementation_id),
                    json!({ "clave": field, "implementacion": implementation_id }),
                    &dependent_key(field, implementation_id),
                )
                .await?;
            stats.works.record(&resolution);
        }

        Ok(())
    }

    fn emit_step(&self, run_id: Uuid, step: &str, counts: EntityCounts) {
        tracing::debug!(
            run_id = %run_id,
            step,
            created = counts.created,
            reused = counts.reused,
            skipped = counts.skipped,
            "Creation step finished"
        );
        self.event_bus.emit_lossy(MigrationEvent::CreationStep {
            run_id,
            step: step.to_string(),
            created: counts.created,
            reused: counts.reused,
            skipped: counts.skipped,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reference_normalizes_and_skips_codeless_rows() {
        let mut input =
            "Clave CCT,Nombre CCT,Municipio\n09abc,Escuela Uno,Centro\n,Sin clave,Norte\n"
                .as_bytes();
        let rows = parse_reference(&mut input).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value("cct"), Some("09abc"));
        assert_eq!(rows[0].value("nombre_escuela"), Some("Escuela Uno"));
    }

    #[test]
    fn test_cct_payload_carries_reference_columns() {
        let row = RawRow::from_pairs(
            2,
            [("cct", "09abc"), ("municipio", "Centro"), ("localidad", "N/A")],
        );
        let payload = cct_payload("09ABC", Some(&row));

        assert_eq!(payload["clave"], "09ABC");
        assert_eq!(payload["municipio"], "Centro");
        assert!(payload.get("localidad").is_none());
        assert!(payload.get("cct").is_none());

        assert_eq!(cct_payload("X1", None), json!({ "clave": "X1" }));
    }
}
