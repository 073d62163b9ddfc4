//! Operator-requested rollback and backup restore

use std::path::Path;

use tracing::{info, warn};

use crate::backup::BackupStatus;
use crate::deploy::fsm::{OperationEvent, OperationFsm};
use crate::errors::OrchestratorError;
use crate::lifecycle::orchestrator::{advance, Orchestrator};
use crate::lifecycle::report::OperationReport;
use crate::storage::state::DeploymentState;

impl Orchestrator {
    /// Roll back to the backup named by the most recent rollback record
    pub async fn rollback_latest(&self) -> Result<OperationReport, OrchestratorError> {
        let record = self.backups.latest_rollback_record().await?.ok_or_else(|| {
            OrchestratorError::NotFound("No rollback record found; nothing to roll back".to_string())
        })?;
        info!(
            "Rolling back upgrade {} -> {} using {}",
            record.from_version.as_deref().unwrap_or("unknown"),
            record.to_version,
            record.backup_path.display()
        );
        self.rollback_from(&record.backup_path, "upgrade --rollback", &record.modules)
            .await
    }

    /// Restore a backup by id or path and bring its module set back up
    pub async fn restore(&self, id_or_path: &str) -> Result<OperationReport, OrchestratorError> {
        let backup = self.backups.locate(id_or_path).await?;
        self.rollback_from(&backup, &format!("backup restore {}", id_or_path), &[])
            .await
    }

    async fn rollback_from(
        &self,
        backup: &Path,
        operation: &str,
        modules: &[String],
    ) -> Result<OperationReport, OrchestratorError> {
        let mut fsm = OperationFsm::new();

        // Validating
        self.executor.check_available().await?;
        let current = DeploymentState::load(&self.layout.config_file()).await?;

        match self.backups.metadata(backup).await {
            Ok(metadata) if metadata.status == BackupStatus::Complete => {}
            Ok(metadata) => {
                warn!("Backup {} is {:?}", metadata.id, metadata.status);
                if !self.confirm.confirm("The backup is incomplete. Restore it anyway?", false)? {
                    return Err(OrchestratorError::Aborted("incomplete backup".to_string()));
                }
            }
            Err(e) => {
                warn!("Backup metadata unreadable: {}", e);
                if !self.confirm.confirm("The backup has no readable metadata. Restore it anyway?", false)? {
                    return Err(OrchestratorError::Aborted("unreadable backup metadata".to_string()));
                }
            }
        }

        let mut touched = current.installed.clone();
        for module in modules {
            if !touched.contains(module) {
                touched.push(module.clone());
            }
        }
        advance(&mut fsm, OperationEvent::Validated)?;
        advance(&mut fsm, OperationEvent::BackupSkipped)?;

        // Mutating and verifying
        match self.rollback_to(backup, &touched).await {
            Ok(restored) => {
                advance(&mut fsm, OperationEvent::Mutated)?;
                advance(&mut fsm, OperationEvent::Verified)?;
                let notes = vec![format!(
                    "Restored {} from {}",
                    restored.installed.join(", "),
                    backup.display()
                )];
                Ok(OperationReport::from_fsm(operation, &fsm, notes))
            }
            Err(e) => {
                advance(&mut fsm, OperationEvent::Abort(e.to_string()))?;
                Err(OrchestratorError::RollbackFailed {
                    cause: Box::new(OrchestratorError::Aborted(format!("{} did not complete", operation))),
                    rollback: Box::new(e),
                    backup: backup.to_path_buf(),
                })
            }
        }
    }
}
