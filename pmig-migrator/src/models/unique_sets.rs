//! Unique sets derived by the analysis phase
//!
//! Built incrementally while the participant stream is read, consumed once by
//! the creation phase. Every collection keeps first-seen order.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// Descriptor of one implementation, taken from the first row that named it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationDescriptor {
    pub name: String,
    pub cycle: String,
    pub period: String,
    /// Program name, absent when the first row had none
    pub program: Option<String>,
}

/// Modality disagreement between rows (first value kept)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModalityConflict {
    pub implementation_key: String,
    pub field: String,
    pub kept: String,
    pub rejected: String,
    pub row_number: u64,
}

#[derive(Debug, Clone, Default)]
pub struct UniqueSets {
    /// Uppercased CCT codes
    pub ccts: IndexSet<String>,
    pub programs: IndexSet<String>,
    /// Implementation business key → descriptor
    pub implementations: IndexMap<String, ImplementationDescriptor>,
    /// Every attendance field seen with a value
    pub attendance_fields: IndexSet<String>,
    /// Every work field seen with a value
    pub work_fields: IndexSet<String>,
    /// `(implementation key, attendance field)` → modality
    pub modalities: IndexMap<(String, String), String>,
    /// Implementation key → attendance fields observed for it
    pub attendance_by_implementation: IndexMap<String, IndexSet<String>>,
    /// Implementation key → work fields observed for it
    pub work_by_implementation: IndexMap<String, IndexSet<String>>,
}

impl UniqueSets {
    /// Insert a descriptor unless the key is already known
    pub fn add_implementation(&mut self, key: &str, descriptor: ImplementationDescriptor) -> bool {
        if self.implementations.contains_key(key) {
            return false;
        }
        self.implementations.insert(key.to_string(), descriptor);
        true
    }

    pub fn observe_attendance(&mut self, implementation_key: &str, field: &str) {
        self.attendance_fields.insert(field.to_string());
        self.attendance_by_implementation
            .entry(implementation_key.to_string())
            .or_default()
            .insert(field.to_string());
    }

    pub fn observe_work(&mut self, implementation_key: &str, field: &str) {
        self.work_fields.insert(field.to_string());
        self.work_by_implementation
            .entry(implementation_key.to_string())
            .or_default()
            .insert(field.to_string());
    }

    /// Record a modality, keeping the first value seen for the key
    ///
    /// Returns the value already held when it differs from `modality`.
    pub fn record_modality(
        &mut self,
        implementation_key: &str,
        field: &str,
        modality: &str,
    ) -> Option<String> {
        let key = (implementation_key.to_string(), field.to_string());
        match self.modalities.get(&key) {
            Some(existing) if existing != modality => Some(existing.clone()),
            Some(_) => None,
            None => {
                self.modalities.insert(key, modality.to_string());
                None
            }
        }
    }

    pub fn modality(&self, implementation_key: &str, field: &str) -> Option<&str> {
        self.modalities
            .get(&(implementation_key.to_string(), field.to_string()))
            .map(String::as_str)
    }

    pub fn attendance_for(&self, implementation_key: &str) -> impl Iterator<Item = &str> {
        self.attendance_by_implementation
            .get(implementation_key)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    pub fn work_for(&self, implementation_key: &str) -> impl Iterator<Item = &str> {
        self.work_by_implementation
            .get(implementation_key)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(program: &str) -> ImplementationDescriptor {
        ImplementationDescriptor {
            name: "I1".to_string(),
            cycle: "2023".to_string(),
            period: "spring".to_string(),
            program: Some(program.to_string()),
        }
    }

    #[test]
    fn test_first_descriptor_wins() {
        let mut sets = UniqueSets::default();
        assert!(sets.add_implementation("I1|2023|spring", descriptor("P1")));
        assert!(!sets.add_implementation("I1|2023|spring", descriptor("P2")));
        assert_eq!(
            sets.implementations["I1|2023|spring"].program.as_deref(),
            Some("P1")
        );
    }

    #[test]
    fn test_modality_first_wins() {
        let mut sets = UniqueSets::default();
        assert_eq!(sets.record_modality("I1", "asist_1", "A"), None);
        assert_eq!(sets.record_modality("I1", "asist_1", "A"), None);
        assert_eq!(sets.record_modality("I1", "asist_1", "B"), Some("A".to_string()));
        assert_eq!(sets.modality("I1", "asist_1"), Some("A"));
        assert_eq!(sets.modality("I2", "asist_1"), None);
    }

    #[test]
    fn test_observed_fields_per_implementation() {
        let mut sets = UniqueSets::default();
        sets.observe_attendance("I1", "asist_1");
        sets.observe_attendance("I1", "asist_2");
        sets.observe_attendance("I2", "asist_1");
        sets.observe_work("I2", "trabajo_1");

        assert_eq!(sets.attendance_for("I1").collect::<Vec<_>>(), vec!["asist_1", "asist_2"]);
        assert_eq!(sets.attendance_fields.len(), 2);
        assert_eq!(sets.work_for("I1").count(), 0);
        assert_eq!(sets.work_for("I2").collect::<Vec<_>>(), vec!["trabajo_1"]);
    }
}
