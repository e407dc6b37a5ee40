//! Migration results and per-row errors
//!
//! Row failures are collected as [`ErrorRecord`]s and handed to the reporter
//! at the end of a run together with the counts in [`BatchSummary`].

use crate::cache::CacheStats;
use crate::services::workflow_orchestrator::statistics::{AnalysisStats, CreationStats};
use chrono::{DateTime, Utc};
use pmig_common::events::MigrationState;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Failed row, kept for manual remediation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// External participant identifier from the row (empty when missing)
    pub participant_id: String,
    pub email: String,
    pub error: String,
    pub row_number: u64,
}

/// Outcome of the best-effort satellite and email work of one row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SatelliteReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<String>,
}

impl SatelliteReport {
    pub fn record_success(&mut self) {
        self.attempted += 1;
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, failure: String) {
        self.attempted += 1;
        self.failures.push(failure);
    }

    pub fn merge(&mut self, other: SatelliteReport) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failures.extend(other.failures);
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Successful row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowOutcome {
    pub row_number: u64,
    pub participant_id: i64,
    pub participation_id: i64,
    /// Participation already existed and was not created again
    pub participation_reused: bool,
    pub satellites: SatelliteReport,
}

/// Batch phase counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_records: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub processing_time_ms: u64,
    pub batches: usize,
    pub satellite_attempted: usize,
    pub satellite_failures: usize,
}

/// Everything handed to the external reporter at the end of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    pub run_id: Uuid,
    pub state: MigrationState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub analysis: AnalysisStats,
    pub creation: CreationStats,
    pub summary: BatchSummary,
    pub errors: Vec<ErrorRecord>,
    pub cache: CacheStats,
}

impl MigrationReport {
    pub fn is_done(&self) -> bool {
        self.state == MigrationState::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_satellite_report_tally() {
        let mut report = SatelliteReport::default();
        report.record_success();
        report.record_failure("attendance asist_1: rejected".to_string());

        let mut other = SatelliteReport::default();
        other.record_success();
        report.merge(other);

        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed(), 1);
    }

    #[test]
    fn test_error_record_serializes() {
        let record = ErrorRecord {
            participant_id: "17".to_string(),
            email: "a@x.com".to_string(),
            error: "Missing implementation id".to_string(),
            row_number: 3,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["row_number"], 3);
        assert_eq!(json["participant_id"], "17");
    }
}
