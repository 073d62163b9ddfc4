//! Operation results

use std::path::PathBuf;

use serde::Serialize;

use crate::deploy::fsm::{OperationFsm, OperationState};

/// Result of a lifecycle operation that did not fail
#[derive(Debug, Clone, Serialize)]
pub struct OperationReport {
    pub operation: String,
    pub state: OperationState,
    /// True when the requested state already held
    pub no_change: bool,
    pub backup: Option<PathBuf>,
    pub history: Vec<OperationState>,
    /// Lines for the operator
    pub notes: Vec<String>,
}

impl OperationReport {
    pub fn from_fsm(operation: &str, fsm: &OperationFsm, notes: Vec<String>) -> Self {
        let history = fsm.history().to_vec();
        let no_change = history.len() == 2
            && history.last() == Some(&OperationState::Committed);
        Self {
            operation: operation.to_string(),
            state: fsm.state().clone(),
            no_change,
            backup: fsm.backup().map(|p| p.to_path_buf()),
            history,
            notes,
        }
    }

    /// One-line summary printed as the final line of output
    pub fn summary(&self) -> String {
        let mut line = if self.no_change {
            format!("{}: nothing to do", self.operation)
        } else {
            format!("{} completed", self.operation)
        };
        if let Some(backup) = &self.backup {
            line.push_str(&format!(" (backup: {})", backup.display()));
        }
        line
    }
}
