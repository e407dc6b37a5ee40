//! Per-phase statistics
//!
//! Aggregated while a phase runs and carried into the final report.

use crate::services::entity_resolver::{Resolution, ResolutionOrigin};
use serde::{Deserialize, Serialize};

/// **ANALYZING Phase Statistics**
///
/// Display: "N rows read, M malformed, P programs, I implementations"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisStats {
    /// Rows kept for the batch phase
    pub total_rows: usize,
    /// Rows skipped because they could not be parsed
    pub malformed_rows: usize,
    /// Rows without implementation name, cycle or period
    pub rows_without_implementation: usize,
    pub programs: usize,
    pub implementations: usize,
    pub ccts: usize,
    pub attendance_fields: usize,
    pub work_fields: usize,
    pub modality_conflicts: usize,
}

impl AnalysisStats {
    pub fn display_string(&self) -> String {
        format!(
            "{} rows read, {} malformed, {} programs, {} implementations",
            self.total_rows, self.malformed_rows, self.programs, self.implementations
        )
    }
}

/// Created / reused / skipped tally for one entity type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub created: usize,
    /// Found in the cache or by remote lookup
    pub reused: usize,
    /// Not attempted because a dependency was missing
    pub skipped: usize,
}

impl EntityCounts {
    pub fn record(&mut self, resolution: &Resolution) {
        match resolution.origin {
            ResolutionOrigin::Created => self.created += 1,
            ResolutionOrigin::Cache | ResolutionOrigin::Found => self.reused += 1,
        }
    }

    pub fn merge(&mut self, other: EntityCounts) {
        self.created += other.created;
        self.reused += other.reused;
        self.skipped += other.skipped;
    }
}

/// **CREATING Phase Statistics**
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationStats {
    pub surveys: EntityCounts,
    pub ccts: EntityCounts,
    pub programs: EntityCounts,
    pub implementations: EntityCounts,
    pub modules: EntityCounts,
    pub attendances: EntityCounts,
    pub works: EntityCounts,
    /// Referential gaps reported by the post-creation cache check
    pub validation_issues: Vec<String>,
}

impl CreationStats {
    pub fn display_string(&self) -> String {
        format!(
            "{} programs, {} implementations ({} skipped), {} modules, \
             {} attendances, {} work items created",
            self.programs.created,
            self.implementations.created,
            self.implementations.skipped,
            self.modules.created,
            self.attendances.created,
            self.works.created
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_counts_record_by_origin() {
        let mut counts = EntityCounts::default();
        counts.record(&Resolution { id: 1, origin: ResolutionOrigin::Created });
        counts.record(&Resolution { id: 1, origin: ResolutionOrigin::Cache });
        counts.record(&Resolution { id: 2, origin: ResolutionOrigin::Found });

        assert_eq!(counts.created, 1);
        assert_eq!(counts.reused, 2);

        let mut total = EntityCounts { skipped: 3, ..Default::default() };
        total.merge(counts);
        assert_eq!(total, EntityCounts { created: 1, reused: 2, skipped: 3 });
    }

    #[test]
    fn test_display_strings() {
        let stats = AnalysisStats {
            total_rows: 10,
            malformed_rows: 1,
            programs: 2,
            implementations: 3,
            ..Default::default()
        };
        assert_eq!(
            stats.display_string(),
            "10 rows read, 1 malformed, 2 programs, 3 implementations"
        );
    }
}
