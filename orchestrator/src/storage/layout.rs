//! Install root layout

use std::path::PathBuf;

use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Default install root on Linux hosts
pub const DEFAULT_ROOT: &str = "/opt/suite";

/// Paths of everything the orchestrator reads or writes under the install root
#[derive(Debug, Clone)]
pub struct InstallLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl InstallLayout {
    /// Create a new layout rooted at `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Flat `KEY=value` configuration file
    pub fn config_file(&self) -> File {
        File::new(self.base_dir.join(".env"))
    }

    /// Infrastructure credentials. Never copied into backups.
    pub fn secrets_file(&self) -> File {
        File::new(self.base_dir.join("secrets.env"))
    }

    /// Compose fragments (`docker-compose.*.yml`)
    pub fn compose_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("compose"))
    }

    /// Customer module manifests, one subdirectory per module
    pub fn modules_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("modules"))
    }

    /// Manifest of one customer module
    pub fn module_manifest(&self, module: &str) -> File {
        self.modules_dir().subdir(module).file("module.yaml")
    }

    pub fn backups_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("backups"))
    }

    /// Marker holding the backup path of a rollback that has not finished
    pub fn rollback_marker(&self) -> File {
        self.backups_dir().file(".rollback-in-progress")
    }

    pub fn uploads_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("data").join("uploads"))
    }

    pub fn certs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("certs"))
    }

    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Orchestrator's own log file
    pub fn log_file(&self) -> File {
        self.logs_dir().file("suitectl.log")
    }

    /// Setup the layout (create directories)
    pub async fn setup(&self) -> Result<(), OrchestratorError> {
        self.compose_dir().create().await?;
        self.modules_dir().create().await?;
        self.backups_dir().create().await?;
        self.uploads_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}
