//! Operator confirmation

use tracing::warn;

use crate::errors::OrchestratorError;

/// Asks the operator to confirm a risky step
pub trait Confirm: Send + Sync {
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool, OrchestratorError>;
}

/// Terminal prompt.
///
/// `--yes` accepts every prompt. Without a terminal (`--non-interactive`)
/// every prompt is declined.
#[derive(Debug, Clone, Copy)]
pub struct DialoguerConfirm {
    pub assume_yes: bool,
    pub interactive: bool,
}

impl DialoguerConfirm {
    pub fn new(assume_yes: bool, interactive: bool) -> Self {
        Self {
            assume_yes,
            interactive,
        }
    }
}

impl Confirm for DialoguerConfirm {
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool, OrchestratorError> {
        if self.assume_yes {
            return Ok(true);
        }
        if !self.interactive {
            warn!("{} (declined: non-interactive, pass --yes to accept)", prompt);
            return Ok(false);
        }

        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()
            .map_err(|e| OrchestratorError::Internal(format!("Failed to get confirmation: {}", e)))
    }
}

/// Answers every prompt the same way
#[derive(Debug, Clone, Copy)]
pub struct FixedConfirm(pub bool);

impl Confirm for FixedConfirm {
    fn confirm(&self, _prompt: &str, _default: bool) -> Result<bool, OrchestratorError> {
        Ok(self.0)
    }
}
