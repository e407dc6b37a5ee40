//! Migration services

pub mod column_rules;
pub mod entity_resolver;
pub mod workflow_orchestrator;

pub use column_rules::{ColumnLayout, FieldKind};
pub use entity_resolver::{EntityResolver, Resolution, ResolutionOrigin};
pub use workflow_orchestrator::WorkflowOrchestrator;
