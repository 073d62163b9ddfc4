//! Finite State Machine for lifecycle operations

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Operation state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Checking prerequisites, loading state, resolving modules
    Validating,

    /// Snapshotting mutable state
    BackingUp,

    /// Stopping and starting containers
    Mutating,

    /// Waiting for touched containers to become healthy
    Verifying,

    /// New state written (or nothing to do)
    Committed,

    /// Stopped before anything was recovered; safe to retry
    Aborted,

    /// Mutation failed verification and automatic rollback was attempted
    FailedRolledBack,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Committed | OperationState::Aborted | OperationState::FailedRolledBack
        )
    }
}

/// Operation event
#[derive(Debug, Clone)]
pub enum OperationEvent {
    /// Validation passed and there is work to do
    Validated,

    /// Requested state already matches; nothing to do
    NoChange,

    /// Backup written
    BackedUp(PathBuf),

    /// Backup skipped or accepted as failed by the operator
    BackupSkipped,

    /// Executor invocation finished
    Mutated,

    /// Touched containers are healthy
    Verified,

    /// Another mutate/verify stage follows
    NextStage,

    /// Stop the pipeline
    Abort(String),

    /// Automatic rollback attempted after a failure
    RolledBack(String),
}

/// Operation FSM
#[derive(Debug, Clone)]
pub struct OperationFsm {
    state: OperationState,
    error: Option<String>,
    backup: Option<PathBuf>,
    stage: u32,
    history: Vec<OperationState>,
}

impl OperationFsm {
    /// Create a new FSM in validating state
    pub fn new() -> Self {
        Self {
            state: OperationState::Validating,
            error: None,
            backup: None,
            stage: 0,
            history: vec![OperationState::Validating],
        }
    }

    /// Get current state
    pub fn state(&self) -> &OperationState {
        &self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Backup taken by this operation, if any
    pub fn backup(&self) -> Option<&Path> {
        self.backup.as_deref()
    }

    /// Number of completed mutate/verify stages
    pub fn stage(&self) -> u32 {
        self.stage
    }

    /// Every state visited, in order
    pub fn history(&self) -> &[OperationState] {
        &self.history
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: OperationEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            // From Validating
            (OperationState::Validating, OperationEvent::Validated) => OperationState::BackingUp,
            (OperationState::Validating, OperationEvent::NoChange) => OperationState::Committed,

            // From BackingUp
            (OperationState::BackingUp, OperationEvent::BackedUp(path)) => {
                self.backup = Some(path.clone());
                OperationState::Mutating
            }
            (OperationState::BackingUp, OperationEvent::BackupSkipped) => OperationState::Mutating,

            // From Mutating
            (OperationState::Mutating, OperationEvent::Mutated) => OperationState::Verifying,

            // From Verifying
            (OperationState::Verifying, OperationEvent::Verified) => {
                self.stage += 1;
                OperationState::Committed
            }
            (OperationState::Verifying, OperationEvent::NextStage) => {
                self.stage += 1;
                OperationState::Mutating
            }

            // Failures
            (state, OperationEvent::Abort(err)) if !state.is_terminal() => {
                self.error = Some(err.clone());
                OperationState::Aborted
            }
            (OperationState::Mutating | OperationState::Verifying, OperationEvent::RolledBack(err))
                if self.backup.is_some() =>
            {
                self.error = Some(err.clone());
                OperationState::FailedRolledBack
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state.clone();
        self.history.push(new_state);
        Ok(())
    }

    /// Whether a failure from here can be recovered by rollback
    pub fn can_roll_back(&self) -> bool {
        self.backup.is_some()
            && matches!(self.state, OperationState::Mutating | OperationState::Verifying)
    }
}

impl Default for OperationFsm {
    fn default() -> Self {
        Self::new()
    }
}
