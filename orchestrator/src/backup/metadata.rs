//! Backup metadata and rollback records

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::state::{InfraMode, ModuleVersion};

/// Metadata file inside every backup directory
pub const METADATA_FILE: &str = "metadata.json";

/// Rollback record file, present only in backups taken ahead of an upgrade
pub const ROLLBACK_FILE: &str = "rollback.json";

/// Overall completeness of a backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    /// Capture started but the final record was never written
    InProgress,
    /// Every piece was captured, skipped on purpose, or absent on the host
    Complete,
    /// At least one piece failed to capture
    Partial,
}

/// Capture status of one backup piece
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum PieceStatus {
    Pending,
    Captured,
    /// Nothing to capture on this host
    Absent,
    /// Deliberately not captured
    Skipped(String),
    Failed(String),
}

impl PieceStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, PieceStatus::Failed(_))
    }
}

/// Per-piece capture status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupPieces {
    pub database: PieceStatus,
    pub uploads: PieceStatus,
    pub config: PieceStatus,
    pub certs: PieceStatus,
    pub logs: PieceStatus,
}

impl BackupPieces {
    pub fn pending() -> Self {
        Self {
            database: PieceStatus::Pending,
            uploads: PieceStatus::Pending,
            config: PieceStatus::Pending,
            certs: PieceStatus::Pending,
            logs: PieceStatus::Pending,
        }
    }

    fn all(&self) -> [&PieceStatus; 5] {
        [
            &self.database,
            &self.uploads,
            &self.config,
            &self.certs,
            &self.logs,
        ]
    }

    /// Final status derived from the pieces
    pub fn status(&self) -> BackupStatus {
        if self
            .all()
            .iter()
            .any(|p| p.is_failed() || **p == PieceStatus::Pending)
        {
            BackupStatus::Partial
        } else {
            BackupStatus::Complete
        }
    }
}

/// Contents of `metadata.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub reason: String,

    /// Base service version installed when the backup was taken
    #[serde(default)]
    pub from_version: Option<String>,

    /// Version the operation that took the backup was moving to
    #[serde(default)]
    pub to_version: Option<String>,

    pub host: String,
    pub operator: String,
    pub infra_mode: InfraMode,

    #[serde(default)]
    pub installed: Vec<String>,

    /// SHA-256 of the captured configuration file
    #[serde(default)]
    pub config_sha256: Option<String>,

    pub status: BackupStatus,
    pub pieces: BackupPieces,
}

/// Contents of `rollback.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub from_version: Option<String>,
    pub to_version: String,

    /// Installed modules and their versions before the upgrade
    pub from_versions: BTreeMap<String, ModuleVersion>,

    /// Modules the upgrade targeted
    #[serde(default)]
    pub modules: Vec<String>,

    pub backup_path: PathBuf,
    pub created_at: DateTime<Utc>,
}
