//! Operator backup commands

use std::path::PathBuf;

use crate::backup::{BackupEntry, BackupRequest};
use crate::errors::OrchestratorError;
use crate::lifecycle::options::OrchestratorOptions;
use crate::lifecycle::orchestrator::Orchestrator;

impl Orchestrator {
    /// Take a backup outside of any lifecycle operation
    pub async fn create_backup(&self, reason: &str) -> Result<BackupEntry, OrchestratorError> {
        let state = self.load_installed_state().await?;
        self.backups
            .create_backup(BackupRequest::new(reason).with_state(&state))
            .await
    }

    pub async fn list_backups(&self) -> Result<Vec<BackupEntry>, OrchestratorError> {
        self.backups.list_backups().await
    }

    /// Apply retention, keeping `keep` backups or the configured `BACKUP_RETENTION`
    pub async fn cleanup_backups(&self, keep: Option<usize>) -> Result<Vec<PathBuf>, OrchestratorError> {
        let keep = match keep {
            Some(keep) => keep,
            None => {
                let state = self.load_installed_state().await?;
                OrchestratorOptions::from_state(&state).backup_retention
            }
        };
        self.backups.cleanup(keep).await
    }
}
