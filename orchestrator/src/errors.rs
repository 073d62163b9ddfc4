//! Error types for the orchestrator

use std::path::PathBuf;

use thiserror::Error;

use crate::deploy::health::HealthVerdict;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Prerequisite failed: {0}")]
    Prerequisite(String),

    #[error("Dependency resolution failed: {0}")]
    Resolution(String),

    #[error("Backup failed: {0}")]
    Backup(String),

    #[error("Executor invocation failed: {0}")]
    Mutation(String),

    #[error("Health check failed for '{service}': last verdict {verdict}")]
    HealthTimeout {
        service: String,
        verdict: HealthVerdict,
    },

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Operation aborted: {0}")]
    Aborted(String),

    #[error("{cause}; rolled back to backup {}", backup.display())]
    RolledBack {
        cause: Box<OrchestratorError>,
        backup: PathBuf,
    },

    #[error("{cause}; automatic rollback failed ({rollback}); manual recovery from {}", backup.display())]
    RollbackFailed {
        cause: Box<OrchestratorError>,
        rollback: Box<OrchestratorError>,
        backup: PathBuf,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            OrchestratorError::Prerequisite(_) => 2,
            OrchestratorError::Resolution(_) => 3,
            OrchestratorError::Backup(_) => 4,
            OrchestratorError::Mutation(_) => 5,
            OrchestratorError::HealthTimeout { .. } => 6,
            OrchestratorError::RollbackFailed { .. } => 7,
            OrchestratorError::Credential(_) => 8,
            OrchestratorError::RolledBack { cause, .. } => cause.exit_code(),
            _ => 1,
        }
    }

    /// Backup available for manual recovery, if the failure happened after one was taken
    pub fn recovery_backup(&self) -> Option<&PathBuf> {
        match self {
            OrchestratorError::RolledBack { backup, .. }
            | OrchestratorError::RollbackFailed { backup, .. } => Some(backup),
            _ => None,
        }
    }
}
