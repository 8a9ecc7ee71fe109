//! State machines for drafts and for the publish workflow
//!
//! Both keep a timestamped transition history that ends up in the report.

use crate::core::error::PublishError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// State transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateTransition<S> {
    /// From state
    pub from: S,

    /// To state
    pub to: S,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Free-form note (error code, abort reason)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

// ============================================================================
// Draft lifecycle
// ============================================================================

/// Draft state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DraftState {
    Unset,
    Created,
    Patched,
    Uploaded,
    Published,
}

impl fmt::Display for DraftState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DraftState::Unset => "Unset",
            DraftState::Created => "Created",
            DraftState::Patched => "Patched",
            DraftState::Uploaded => "Uploaded",
            DraftState::Published => "Published",
        };
        f.write_str(name)
    }
}

/// Lifecycle shared by every draft backend
///
/// Backends call the `ensure_*` guard before talking to the remote side and
/// `advance` only after the remote call succeeded.
#[derive(Debug, Clone)]
pub struct DraftLifecycle {
    repository: String,
    state: DraftState,
    transitions: Vec<StateTransition<DraftState>>,
}

impl DraftLifecycle {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            state: DraftState::Unset,
            transitions: Vec::new(),
        }
    }

    /// Lifecycle of a draft that already exists remotely
    pub fn resumed(repository: impl Into<String>) -> Self {
        let mut lifecycle = Self::new(repository);
        lifecycle.state = DraftState::Created;
        lifecycle
    }

    pub fn state(&self) -> DraftState {
        self.state
    }

    pub fn transitions(&self) -> &[StateTransition<DraftState>] {
        &self.transitions
    }

    pub fn ensure_can_create(&self, locator: &str) -> Result<(), PublishError> {
        if self.state == DraftState::Unset {
            Ok(())
        } else {
            Err(PublishError::AlreadyExists {
                repository: self.repository.clone(),
                locator: locator.to_string(),
            })
        }
    }

    pub fn ensure_can_patch(&self) -> Result<(), PublishError> {
        match self.state {
            DraftState::Created | DraftState::Patched => Ok(()),
            _ => Err(self.invalid("patch")),
        }
    }

    /// Ticket and PID references may be added before or after the main patch
    pub fn ensure_can_patch_references(&self) -> Result<(), PublishError> {
        self.ensure_can_patch()
    }

    pub fn ensure_can_upload(&self) -> Result<(), PublishError> {
        match self.state {
            DraftState::Patched | DraftState::Uploaded => Ok(()),
            _ => Err(self.invalid("upload to")),
        }
    }

    pub fn ensure_can_publish(&self) -> Result<(), PublishError> {
        let message = match self.state {
            DraftState::Patched | DraftState::Uploaded => return Ok(()),
            DraftState::Unset => "draft was never created",
            DraftState::Created => "draft metadata was never patched",
            DraftState::Published => "draft is already published",
        };
        Err(PublishError::Publish {
            repository: self.repository.clone(),
            message: message.to_string(),
        })
    }

    /// Move forward; same-state moves are allowed for repeatable steps
    pub fn advance(&mut self, to: DraftState) -> Result<(), PublishError> {
        use DraftState::*;

        let allowed = matches!(
            (self.state, to),
            (Unset, Created)
                | (Created, Patched)
                | (Patched, Patched)
                | (Patched, Uploaded)
                | (Uploaded, Uploaded)
                | (Patched, Published)
                | (Uploaded, Published)
        );
        if !allowed {
            return Err(self.invalid(&format!("move to {}", to)));
        }
        if self.state != to {
            self.transitions.push(StateTransition {
                from: self.state,
                to,
                timestamp: Utc::now(),
                note: None,
            });
            self.state = to;
        }
        Ok(())
    }

    fn invalid(&self, operation: &str) -> PublishError {
        PublishError::InvalidState {
            repository: self.repository.clone(),
            operation: operation.to_string(),
            state: self.state.to_string(),
        }
    }
}

// ============================================================================
// Workflow
// ============================================================================

/// Publish workflow state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Initial,
    Locked,
    Validating,
    AssigningIdentifiers,
    CreatingDraft,
    RunningSteps,
    Confirming,
    Publishing,
    Reporting,
    Published,
    Aborted,
}

/// Tracks the publish workflow; in memory only, the report is the durable record
#[derive(Debug, Clone)]
pub struct WorkflowStateMachine {
    current_state: WorkflowState,
    transitions: Vec<StateTransition<WorkflowState>>,
}

impl Default for WorkflowStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowStateMachine {
    pub fn new() -> Self {
        Self {
            current_state: WorkflowState::Initial,
            transitions: Vec::new(),
        }
    }

    /// Transition to a new state
    pub fn transition(&mut self, to: WorkflowState, note: Option<String>) {
        self.transitions.push(StateTransition {
            from: self.current_state,
            to,
            timestamp: Utc::now(),
            note,
        });
        self.current_state = to;
    }

    /// Get current state
    pub fn get_state(&self) -> WorkflowState {
        self.current_state
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.current_state,
            WorkflowState::Published | WorkflowState::Aborted
        )
    }

    pub fn transitions(&self) -> &[StateTransition<WorkflowState>] {
        &self.transitions
    }

    /// Get elapsed time since the first transition, in milliseconds
    pub fn get_elapsed_time(&self) -> i64 {
        match (self.transitions.first(), self.transitions.last()) {
            (Some(first), Some(last)) => (last.timestamp - first.timestamp).num_milliseconds(),
            _ => 0,
        }
    }

    /// Get transition history as human-readable lines
    pub fn get_history(&self) -> Vec<String> {
        self.transitions
            .iter()
            .map(|t| {
                let note = t
                    .note
                    .as_ref()
                    .map(|n| format!(" ({})", n))
                    .unwrap_or_default();
                format!("{}: {:?} → {:?}{}", t.timestamp.to_rfc3339(), t.from, t.to, note)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_happy_path() {
        let mut lifecycle = DraftLifecycle::new("Repo");

        lifecycle.ensure_can_create("x").unwrap();
        lifecycle.advance(DraftState::Created).unwrap();
        lifecycle.ensure_can_patch().unwrap();
        lifecycle.advance(DraftState::Patched).unwrap();
        lifecycle.ensure_can_upload().unwrap();
        lifecycle.advance(DraftState::Uploaded).unwrap();
        lifecycle.advance(DraftState::Uploaded).unwrap();
        lifecycle.ensure_can_publish().unwrap();
        lifecycle.advance(DraftState::Published).unwrap();

        assert_eq!(lifecycle.state(), DraftState::Published);
        // repeated upload is not a new transition
        assert_eq!(lifecycle.transitions().len(), 4);
    }

    #[test]
    fn test_upload_is_optional() {
        let mut lifecycle = DraftLifecycle::new("Repo");
        lifecycle.advance(DraftState::Created).unwrap();
        lifecycle.advance(DraftState::Patched).unwrap();

        assert!(lifecycle.advance(DraftState::Published).is_ok());
    }

    #[test]
    fn test_create_twice_is_already_exists() {
        let mut lifecycle = DraftLifecycle::new("Repo");
        lifecycle.advance(DraftState::Created).unwrap();

        let err = lifecycle.ensure_can_create("http://repo/draft/1").unwrap_err();
        assert!(matches!(err, PublishError::AlreadyExists { .. }));
    }

    #[test]
    fn test_publish_before_create_is_publish_error() {
        let lifecycle = DraftLifecycle::new("Repo");

        let err = lifecycle.ensure_can_publish().unwrap_err();
        assert!(matches!(err, PublishError::Publish { .. }));
        assert!(err.to_string().contains("never created"));
    }

    #[test]
    fn test_no_skipping_patch() {
        let mut lifecycle = DraftLifecycle::new("Repo");
        lifecycle.advance(DraftState::Created).unwrap();

        assert!(lifecycle.ensure_can_upload().is_err());
        assert!(lifecycle.ensure_can_publish().is_err());
        assert!(lifecycle.advance(DraftState::Published).is_err());
        assert_eq!(lifecycle.state(), DraftState::Created);
    }

    #[test]
    fn test_no_backward_transitions() {
        let mut lifecycle = DraftLifecycle::new("Repo");
        lifecycle.advance(DraftState::Created).unwrap();
        lifecycle.advance(DraftState::Patched).unwrap();

        let err = lifecycle.advance(DraftState::Created).unwrap_err();
        assert!(matches!(err, PublishError::InvalidState { .. }));
        assert!(lifecycle.ensure_can_patch_references().is_ok());
    }

    #[test]
    fn test_resumed_lifecycle_starts_created() {
        let lifecycle = DraftLifecycle::resumed("Repo");

        assert_eq!(lifecycle.state(), DraftState::Created);
        assert!(lifecycle.ensure_can_create("x").is_err());
    }

    #[test]
    fn test_workflow_transitions() {
        let mut machine = WorkflowStateMachine::new();
        assert_eq!(machine.get_state(), WorkflowState::Initial);
        assert!(!machine.is_terminal());

        machine.transition(WorkflowState::Locked, None);
        machine.transition(WorkflowState::Aborted, Some("VALIDATION_ERROR".to_string()));

        assert!(machine.is_terminal());
        let history = machine.get_history();
        assert_eq!(history.len(), 2);
        assert!(history[0].contains("Initial → Locked"));
        assert!(history[1].contains("(VALIDATION_ERROR)"));
        assert!(machine.get_elapsed_time() >= 0);
    }
}
