//! Test Helper Utilities
//!
//! Shared utilities for testing pmig-migrator

#![allow(dead_code)]

use pmig_common::config::{ProcessMode, ProcessingConfig};
use pmig_common::events::{EventBus, MigrationEvent};
use pmig_migrator::store::MemoryStore;
use pmig_migrator::{RemoteStore, WorkflowOrchestrator};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Participant header used by most tests
pub const HEADER: &str = "ID,Correo,CCT,Programa,Implementación,Ciclo Escolar,\
                          Periodo de Implementación,Nombre,asist_1,modalidad_asist_1,\
                          trabajo_1,modulo_1,encuesta_inicial,minutos_app";

/// Participant row with the columns of [`HEADER`]
#[derive(Debug, Clone)]
pub struct TestRow {
    pub id: String,
    pub email: String,
    pub cct: String,
    pub program: String,
    pub implementation: String,
    pub cycle: String,
    pub period: String,
    pub attendance: String,
    pub modality: String,
    pub work: String,
    pub module: String,
    pub survey: String,
    pub app_minutes: String,
}

impl TestRow {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            email: format!("p{}@example.com", id),
            cct: "09DPR0001A".to_string(),
            program: "P1".to_string(),
            implementation: "I1".to_string(),
            cycle: "2023".to_string(),
            period: "spring".to_string(),
            attendance: String::new(),
            modality: String::new(),
            work: String::new(),
            module: String::new(),
            survey: String::new(),
            app_minutes: String::new(),
        }
    }

    pub fn cct(mut self, cct: &str) -> Self {
        self.cct = cct.to_string();
        self
    }

    pub fn program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    pub fn implementation(mut self, name: &str) -> Self {
        self.implementation = name.to_string();
        self
    }

    pub fn attendance(mut self, value: &str, modality: &str) -> Self {
        self.attendance = value.to_string();
        self.modality = modality.to_string();
        self
    }

    pub fn work(mut self, value: &str) -> Self {
        self.work = value.to_string();
        self
    }

    pub fn module(mut self, value: &str) -> Self {
        self.module = value.to_string();
        self
    }

    pub fn survey(mut self, value: &str) -> Self {
        self.survey = value.to_string();
        self
    }

    pub fn app_minutes(mut self, value: &str) -> Self {
        self.app_minutes = value.to_string();
        self
    }

    pub fn line(&self) -> String {
        [
            self.id.as_str(),
            &self.email,
            &self.cct,
            &self.program,
            &self.implementation,
            &self.cycle,
            &self.period,
            "Ana",
            &self.attendance,
            &self.modality,
            &self.work,
            &self.module,
            &self.survey,
            &self.app_minutes,
        ]
        .join(",")
    }
}

/// Full CSV document for `rows`
pub fn participants_csv(rows: &[TestRow]) -> String {
    let mut csv = String::from(HEADER);
    csv.push('\n');
    for row in rows {
        csv.push_str(&row.line());
        csv.push('\n');
    }
    csv
}

/// `count` rows with ids 1..=count, all in P1 / I1
pub fn numbered_rows(count: usize) -> Vec<TestRow> {
    (1..=count).map(|i| TestRow::new(&i.to_string())).collect()
}

pub fn processing_config(mode: ProcessMode, batch_size: usize) -> ProcessingConfig {
    ProcessingConfig {
        process_mode: mode,
        batch_size,
        ..Default::default()
    }
}

/// Orchestrator over an in-memory store
pub fn create_test_orchestrator(
    store: &Arc<MemoryStore>,
    config: ProcessingConfig,
) -> WorkflowOrchestrator {
    let store: Arc<dyn RemoteStore> = store.clone();
    WorkflowOrchestrator::new(store, config, EventBus::new(1000)).expect("valid test config")
}

/// Drain every event currently buffered on a receiver
pub fn drain_events(rx: &mut broadcast::Receiver<MigrationEvent>) -> Vec<MigrationEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
