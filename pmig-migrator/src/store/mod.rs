//! Remote content store abstraction
//!
//! Every entity type is reached through the same two operations: an equality
//! lookup limited to one result, and a create taking a single payload object.
//! The backend offers no uniqueness constraints, so callers are responsible for
//! not creating the same business entity twice.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub mod http_store;
pub mod memory_store;

pub use http_store::HttpStore;
pub use memory_store::MemoryStore;

/// Identifier assigned by the remote store
pub type RemoteId = i64;

/// Remote store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Rate limit exceeded after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("Parse error: {0}")]
    Parse(String),

    /// Payload refused by the store
    #[error("Rejected by {collection}: {reason}")]
    Rejected {
        collection: Collection,
        reason: String,
    },
}

/// Remote collections used by the migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Programs,
    Implementations,
    Modules,
    Attendances,
    WorkItems,
    Participants,
    Surveys,
    Ccts,
    Participations,
    AppUsages,
    ModuleProgress,
    SurveyCompletions,
    AttendanceRecords,
    WorkCompletions,
    ParticipantEmails,
}

impl Collection {
    /// URL path segment of the collection
    pub fn slug(&self) -> &'static str {
        match self {
            Collection::Programs => "programas",
            Collection::Implementations => "implementaciones",
            Collection::Modules => "modulos",
            Collection::Attendances => "asistencias",
            Collection::WorkItems => "trabajos",
            Collection::Participants => "participantes",
            Collection::Surveys => "encuestas",
            Collection::Ccts => "ccts",
            Collection::Participations => "participaciones",
            Collection::AppUsages => "uso-app",
            Collection::ModuleProgress => "avance-modulos",
            Collection::SurveyCompletions => "encuestas-completadas",
            Collection::AttendanceRecords => "participante-asistencias",
            Collection::WorkCompletions => "participante-trabajos",
            Collection::ParticipantEmails => "participante-emails",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Conjunction of equality conditions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    conditions: Vec<(String, String)>,
}

impl Filter {
    /// Single equality condition
    pub fn eq(field: impl Into<String>, value: impl ToString) -> Self {
        Self {
            conditions: vec![(field.into(), value.to_string())],
        }
    }

    /// Add another equality condition
    pub fn and(mut self, field: impl Into<String>, value: impl ToString) -> Self {
        self.conditions.push((field.into(), value.to_string()));
        self
    }

    pub fn conditions(&self) -> &[(String, String)] {
        &self.conditions
    }

    /// Whether a stored payload satisfies every condition
    pub fn matches(&self, payload: &Value) -> bool {
        self.conditions.iter().all(|(field, expected)| {
            payload
                .get(field)
                .and_then(filter_string)
                .is_some_and(|actual| actual == *expected)
        })
    }
}

/// Render a scalar JSON value the way it appears in a filter
pub(crate) fn filter_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Generic create/read API of the content store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Backend identifier for logs
    fn name(&self) -> &'static str;

    /// Equality lookup, first match only
    async fn find(&self, collection: Collection, filter: &Filter)
        -> Result<Option<RemoteId>, StoreError>;

    /// Create one entity, returning its id
    async fn create(&self, collection: Collection, payload: Value) -> Result<RemoteId, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_matches_all_conditions() {
        let payload = json!({"participante": 7, "email": "a@x.com", "principal": true});

        assert!(Filter::eq("participante", 7).matches(&payload));
        assert!(Filter::eq("participante", 7).and("email", "a@x.com").matches(&payload));
        assert!(Filter::eq("principal", true).matches(&payload));
        assert!(!Filter::eq("participante", 7).and("email", "b@x.com").matches(&payload));
        assert!(!Filter::eq("missing", "x").matches(&payload));
    }

    #[test]
    fn test_null_fields_never_match() {
        let payload = json!({"cct": null});
        assert!(!Filter::eq("cct", "null").matches(&payload));
    }

    #[test]
    fn test_slugs_are_unique() {
        use std::collections::HashSet;
        let all = [
            Collection::Programs,
            Collection::Implementations,
            Collection::Modules,
            Collection::Attendances,
            Collection::WorkItems,
            Collection::Participants,
            Collection::Surveys,
            Collection::Ccts,
            Collection::Participations,
            Collection::AppUsages,
            Collection::ModuleProgress,
            Collection::SurveyCompletions,
            Collection::AttendanceRecords,
            Collection::WorkCompletions,
            Collection::ParticipantEmails,
        ];
        let slugs: HashSet<_> = all.iter().map(|c| c.slug()).collect();
        assert_eq!(slugs.len(), all.len());
    }
}
