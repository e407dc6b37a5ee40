//! Migration run state machine
//!
//! ANALYZING → CREATING → BATCHING → DONE. An error while analyzing or
//! creating moves the run to FAILED; batch errors never do.

use chrono::{DateTime, Utc};
use pmig_common::events::MigrationState;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub run_id: Uuid,
    pub old_state: MigrationState,
    pub new_state: MigrationState,
    pub transitioned_at: DateTime<Utc>,
}

/// One migration run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSession {
    pub run_id: Uuid,
    pub state: MigrationState,
    pub started_at: DateTime<Utc>,
    /// Set when a terminal state is reached
    pub ended_at: Option<DateTime<Utc>>,
    pub transitions: Vec<StateTransition>,
}

impl MigrationSession {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: MigrationState::Analyzing,
            started_at: Utc::now(),
            ended_at: None,
            transitions: Vec::new(),
        }
    }

    /// Transition to new state
    pub fn transition_to(&mut self, new_state: MigrationState) -> StateTransition {
        let transition = StateTransition {
            run_id: self.run_id,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };
        self.state = new_state;

        if new_state.is_terminal() {
            self.ended_at = Some(transition.transitioned_at);
        }

        self.transitions.push(transition.clone());
        transition
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

impl Default for MigrationSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut session = MigrationSession::new();
        assert_eq!(session.state, MigrationState::Analyzing);

        session.transition_to(MigrationState::Creating);
        session.transition_to(MigrationState::Batching);
        assert!(!session.is_terminal());
        assert!(session.ended_at.is_none());

        let last = session.transition_to(MigrationState::Done);
        assert_eq!(last.old_state, MigrationState::Batching);
        assert!(session.is_terminal());
        assert!(session.ended_at.is_some());
        assert_eq!(session.transitions.len(), 3);
    }

    #[test]
    fn test_failure_is_terminal() {
        let mut session = MigrationSession::new();
        session.transition_to(MigrationState::Failed);
        assert!(session.is_terminal());
    }
}
