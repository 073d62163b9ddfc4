//! Backup and restore of mutable installation state

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::backup::metadata::{
    BackupMetadata, BackupPieces, BackupStatus, PieceStatus, RollbackRecord, METADATA_FILE,
    ROLLBACK_FILE,
};
use crate::deploy::executor::Executor;
use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::registry::module::BASE_MODULE;
use crate::storage::layout::InstallLayout;
use crate::storage::state::{DeploymentState, InfraMode};
use crate::utils::sha256_hash;

pub const DATABASE_FILE: &str = "database.sql";
pub const UPLOADS_DIR: &str = "uploads";
pub const CONFIG_FILE: &str = "config.env";
pub const CERTS_DIR: &str = "certs";
pub const LOGS_FILE: &str = "logs.txt";

/// Log lines captured from containers and from the orchestrator's own log
const LOG_TAIL_LINES: usize = 500;

/// Database service in `full` infra mode
pub const DATABASE_SERVICE: &str = "postgres";

/// Dump the application database using the credentials of the postgres container itself
pub fn dump_command() -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        r#"pg_dump --clean --if-exists -U "$POSTGRES_USER" "$POSTGRES_DB""#.to_string(),
    ]
}

/// Replay a dump read from stdin
pub fn psql_stdin_command() -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        r#"psql -v ON_ERROR_STOP=1 -q -U "$POSTGRES_USER" -d "$POSTGRES_DB""#.to_string(),
    ]
}

/// What a backup is being taken for
#[derive(Debug, Clone)]
pub struct BackupRequest<'a> {
    pub reason: &'a str,
    pub state: Option<&'a DeploymentState>,
    pub to_version: Option<&'a str>,
}

impl<'a> BackupRequest<'a> {
    pub fn new(reason: &'a str) -> Self {
        Self {
            reason,
            state: None,
            to_version: None,
        }
    }

    pub fn with_state(mut self, state: &'a DeploymentState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_target(mut self, to_version: &'a str) -> Self {
        self.to_version = Some(to_version);
        self
    }
}

/// A backup directory with its metadata, if readable
#[derive(Debug, Clone)]
pub struct BackupEntry {
    pub id: String,
    pub path: PathBuf,
    pub metadata: Option<BackupMetadata>,
}

/// Pieces handled by a restore
#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    pub missing: Vec<String>,
}

/// Creates, restores and prunes backups under the install root
#[derive(Clone)]
pub struct BackupManager {
    layout: InstallLayout,
    executor: Arc<dyn Executor>,
}

impl BackupManager {
    pub fn new(layout: InstallLayout, executor: Arc<dyn Executor>) -> Self {
        Self { layout, executor }
    }

    fn backups_dir(&self) -> Dir {
        self.layout.backups_dir()
    }

    /// Take a new backup.
    ///
    /// Each piece is captured independently. A piece that fails to capture
    /// marks the backup `partial` instead of failing the whole backup; only a
    /// backup directory that cannot be created at all is an error.
    pub async fn create_backup(
        &self,
        request: BackupRequest<'_>,
    ) -> Result<BackupEntry, OrchestratorError> {
        let (id, dir) = self.allocate_dir().await?;
        info!("Creating backup {} ({})", id, request.reason);

        let state = match request.state {
            Some(state) => state.clone(),
            None => DeploymentState::load(&self.layout.config_file())
                .await
                .unwrap_or_else(|_| DeploymentState::new(InfraMode::default())),
        };

        let mut metadata = BackupMetadata {
            id: id.clone(),
            created_at: Utc::now(),
            reason: request.reason.to_string(),
            from_version: state.version(BASE_MODULE).map(|v| v.backend.clone()),
            to_version: request.to_version.map(|v| v.to_string()),
            host: hostname(),
            operator: operator(),
            infra_mode: state.infra_mode,
            installed: state.installed.clone(),
            config_sha256: None,
            status: BackupStatus::InProgress,
            pieces: BackupPieces::pending(),
        };
        dir.file(METADATA_FILE)
            .write_json(&metadata)
            .await
            .map_err(|e| OrchestratorError::Backup(format!("cannot write metadata: {}", e)))?;

        metadata.pieces.database = self.capture_database(&dir, state.infra_mode).await;
        metadata.pieces.uploads = capture_dir(&self.layout.uploads_dir(), &dir.subdir(UPLOADS_DIR)).await;
        metadata.pieces.config = self.capture_config(&dir, &mut metadata.config_sha256).await;
        metadata.pieces.certs = capture_dir(&self.layout.certs_dir(), &dir.subdir(CERTS_DIR)).await;
        metadata.pieces.logs = self.capture_logs(&dir).await;
        metadata.status = metadata.pieces.status();

        dir.file(METADATA_FILE)
            .write_json(&metadata)
            .await
            .map_err(|e| OrchestratorError::Backup(format!("cannot write metadata: {}", e)))?;

        if metadata.status == BackupStatus::Partial {
            warn!("Backup {} is partial: {:?}", id, metadata.pieces);
        } else {
            info!("Backup {} complete", id);
        }

        Ok(BackupEntry {
            id,
            path: dir.path().to_path_buf(),
            metadata: Some(metadata),
        })
    }

    /// Pick a fresh `YYYYMMDD-HHMMSS[-n]` directory
    async fn allocate_dir(&self) -> Result<(String, Dir), OrchestratorError> {
        let stamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
        let backups = self.backups_dir();
        backups
            .create()
            .await
            .map_err(|e| OrchestratorError::Backup(format!("cannot create {}: {}", backups.path().display(), e)))?;

        let mut id = stamp.clone();
        let mut n = 0;
        while backups.subdir(&id).exists().await {
            n += 1;
            id = format!("{}-{}", stamp, n);
        }

        let dir = backups.subdir(&id);
        dir.create()
            .await
            .map_err(|e| OrchestratorError::Backup(format!("cannot create {}: {}", dir.path().display(), e)))?;
        Ok((id, dir))
    }

    async fn capture_database(&self, dir: &Dir, infra_mode: InfraMode) -> PieceStatus {
        if infra_mode == InfraMode::External {
            return PieceStatus::Skipped("database runs on external infrastructure".to_string());
        }

        match self.executor.exec(DATABASE_SERVICE, &dump_command(), None).await {
            Ok(dump) => match dir.file(DATABASE_FILE).write_bytes(&dump).await {
                Ok(()) => {
                    debug!("Captured database dump ({} bytes)", dump.len());
                    PieceStatus::Captured
                }
                Err(e) => failed("database", e),
            },
            Err(e) => failed("database", e),
        }
    }

    async fn capture_config(&self, dir: &Dir, checksum: &mut Option<String>) -> PieceStatus {
        let config = self.layout.config_file();
        if !config.exists().await {
            return PieceStatus::Absent;
        }
        match config.read_bytes().await {
            Ok(bytes) => match dir.file(CONFIG_FILE).write_bytes(&bytes).await {
                Ok(()) => {
                    *checksum = Some(sha256_hash(&bytes));
                    PieceStatus::Captured
                }
                Err(e) => failed("config", e),
            },
            Err(e) => failed("config", e),
        }
    }

    async fn capture_logs(&self, dir: &Dir) -> PieceStatus {
        let mut text = String::new();
        let mut errors = Vec::new();

        let own_log = self.layout.log_file();
        if own_log.exists().await {
            match own_log.read_tail(LOG_TAIL_LINES).await {
                Ok(tail) => {
                    text.push_str("==> suitectl <==\n");
                    text.push_str(&tail);
                }
                Err(e) => errors.push(e.to_string()),
            }
        }

        match self.executor.logs_tail(LOG_TAIL_LINES).await {
            Ok(tail) => {
                text.push_str("==> containers <==\n");
                text.push_str(&tail);
            }
            Err(e) => errors.push(e.to_string()),
        }

        if text.is_empty() && !errors.is_empty() {
            return failed("logs", errors.join("; "));
        }
        match dir.file(LOGS_FILE).write_string(&text).await {
            Ok(()) => PieceStatus::Captured,
            Err(e) => failed("logs", e),
        }
    }

    /// Resolve a backup id or path to an existing backup directory
    pub async fn locate(&self, id_or_path: &str) -> Result<PathBuf, OrchestratorError> {
        let candidate = PathBuf::from(id_or_path);
        let dir = if candidate.is_absolute() {
            Dir::new(candidate)
        } else {
            self.backups_dir().subdir(id_or_path)
        };
        if dir.exists().await {
            Ok(dir.path().to_path_buf())
        } else {
            Err(OrchestratorError::NotFound(format!("backup {}", id_or_path)))
        }
    }

    /// Read a backup's metadata
    pub async fn metadata(&self, backup: &Path) -> Result<BackupMetadata, OrchestratorError> {
        File::new(backup.join(METADATA_FILE)).read_json().await
    }

    /// Restore every captured piece: files first, then the database
    pub async fn restore_backup(&self, backup: &Path) -> Result<RestoreReport, OrchestratorError> {
        let mut report = self.restore_files(backup).await?;
        if self.restore_database(backup).await? {
            report.restored.push("database".to_string());
        } else {
            report.missing.push("database".to_string());
        }
        Ok(report)
    }

    /// Restore configuration, uploads and TLS material. Absent pieces are skipped.
    pub async fn restore_files(&self, backup: &Path) -> Result<RestoreReport, OrchestratorError> {
        let dir = Dir::new(backup);
        if !dir.exists().await {
            return Err(OrchestratorError::NotFound(format!("backup {}", backup.display())));
        }

        let mut report = RestoreReport::default();
        let mut errors = Vec::new();

        let config = dir.file(CONFIG_FILE);
        if config.exists().await {
            let result = match config.read_bytes().await {
                Ok(bytes) => self.layout.config_file().write_atomic(&bytes).await,
                Err(e) => Err(e),
            };
            record_restore("config", result, &mut report, &mut errors);
        } else {
            report.missing.push("config".to_string());
        }

        for (piece, target) in [
            (UPLOADS_DIR, self.layout.uploads_dir()),
            (CERTS_DIR, self.layout.certs_dir()),
        ] {
            let source = dir.subdir(piece);
            if source.exists().await {
                let result = source.replace(&target).await.map(|_| ());
                record_restore(piece, result, &mut report, &mut errors);
            } else {
                report.missing.push(piece.to_string());
            }
        }

        if !errors.is_empty() {
            return Err(OrchestratorError::Backup(format!(
                "restore from {} failed: {}",
                backup.display(),
                errors.join("; ")
            )));
        }
        info!("Restored {:?} from {}", report.restored, backup.display());
        Ok(report)
    }

    /// Replay the database dump, if the backup holds one. Returns whether it did.
    pub async fn restore_database(&self, backup: &Path) -> Result<bool, OrchestratorError> {
        let dump = File::new(backup.join(DATABASE_FILE));
        if !dump.exists().await {
            debug!("No database dump in {}", backup.display());
            return Ok(false);
        }

        let bytes = dump.read_bytes().await?;
        self.executor
            .exec(DATABASE_SERVICE, &psql_stdin_command(), Some(bytes))
            .await
            .map_err(|e| OrchestratorError::Backup(format!("database restore failed: {}", e)))?;
        info!("Restored database from {}", backup.display());
        Ok(true)
    }

    /// All backups, newest first
    pub async fn list_backups(&self) -> Result<Vec<BackupEntry>, OrchestratorError> {
        let backups = self.backups_dir();
        if !backups.exists().await {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for path in backups.list_dirs().await? {
            let Some(id) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            if id.starts_with('.') {
                continue;
            }
            let metadata = match self.metadata(&path).await {
                Ok(metadata) => Some(metadata),
                Err(e) => {
                    debug!("Unreadable backup metadata in {}: {}", path.display(), e);
                    None
                }
            };
            entries.push(BackupEntry { id, path, metadata });
        }

        entries.sort_by(|a, b| backup_sort_key(&b.id).cmp(&backup_sort_key(&a.id)));
        Ok(entries)
    }

    /// Keep the `keep_n` most recent backups and delete older ones.
    ///
    /// The backup referenced by the most recent rollback record and the one
    /// named by an in-progress rollback are never deleted.
    pub async fn cleanup(&self, keep_n: usize) -> Result<Vec<PathBuf>, OrchestratorError> {
        let entries = self.list_backups().await?;
        let mut protected = Vec::new();
        if let Some(record) = self.latest_rollback_record().await? {
            protected.push(record.backup_path);
        }
        if let Some(path) = self.rollback_in_progress().await {
            protected.push(path);
        }

        let mut deleted = Vec::new();
        for entry in entries.into_iter().skip(keep_n) {
            if protected.iter().any(|p| same_path(p, &entry.path)) {
                info!("Keeping backup {} (referenced by rollback)", entry.id);
                continue;
            }
            match Dir::new(&entry.path).delete().await {
                Ok(()) => {
                    info!("Deleted backup {}", entry.id);
                    deleted.push(entry.path);
                }
                Err(e) => warn!("Could not delete backup {}: {}", entry.id, e),
            }
        }
        Ok(deleted)
    }

    /// Store a rollback record next to a backup
    pub async fn attach_rollback_record(
        &self,
        backup: &Path,
        record: &RollbackRecord,
    ) -> Result<(), OrchestratorError> {
        File::new(backup.join(ROLLBACK_FILE))
            .write_json(record)
            .await
            .map_err(|e| OrchestratorError::Backup(format!("cannot write rollback record: {}", e)))
    }

    /// Rollback record of the newest backup that has one
    pub async fn latest_rollback_record(&self) -> Result<Option<RollbackRecord>, OrchestratorError> {
        for entry in self.list_backups().await? {
            let file = File::new(entry.path.join(ROLLBACK_FILE));
            if !file.exists().await {
                continue;
            }
            match file.read_json::<RollbackRecord>().await {
                Ok(record) => return Ok(Some(record)),
                Err(e) => warn!("Ignoring unreadable rollback record in {}: {}", entry.id, e),
            }
        }
        Ok(None)
    }

    /// Mark a rollback from `backup` as started
    pub async fn mark_rollback_started(&self, backup: &Path) -> Result<(), OrchestratorError> {
        self.layout
            .rollback_marker()
            .write_atomic(backup.to_string_lossy().as_bytes())
            .await
    }

    pub async fn mark_rollback_finished(&self) -> Result<(), OrchestratorError> {
        self.layout.rollback_marker().delete().await
    }

    /// Backup of a rollback that started but never finished
    pub async fn rollback_in_progress(&self) -> Option<PathBuf> {
        let marker = self.layout.rollback_marker();
        if !marker.exists().await {
            return None;
        }
        marker
            .read_string()
            .await
            .ok()
            .map(|s| PathBuf::from(s.trim()))
            .filter(|p| !p.as_os_str().is_empty())
    }
}

async fn capture_dir(source: &Dir, dest: &Dir) -> PieceStatus {
    if !source.exists().await {
        return PieceStatus::Absent;
    }
    match source.copy_to(dest).await {
        Ok(files) => {
            debug!("Copied {} files from {}", files, source.path().display());
            PieceStatus::Captured
        }
        Err(e) => failed(&dest.path().display().to_string(), e),
    }
}

fn failed(piece: &str, err: impl std::fmt::Display) -> PieceStatus {
    warn!("Backup of {} failed: {}", piece, err);
    PieceStatus::Failed(err.to_string())
}

fn record_restore(
    piece: &str,
    result: Result<(), OrchestratorError>,
    report: &mut RestoreReport,
    errors: &mut Vec<String>,
) {
    match result {
        Ok(()) => report.restored.push(piece.to_string()),
        Err(e) => {
            warn!("Restore of {} failed: {}", piece, e);
            errors.push(format!("{}: {}", piece, e));
        }
    }
}

/// Order `YYYYMMDD-HHMMSS[-n]` ids chronologically, including the collision suffix
fn backup_sort_key(id: &str) -> (String, u32) {
    match id.get(..15) {
        Some(stamp) => {
            let suffix = id[15..].trim_start_matches('-').parse().unwrap_or(0);
            (stamp.to_string(), suffix)
        }
        None => (id.to_string(), 0),
    }
}

/// Backups all live in one directory, so the id identifies them
fn same_path(a: &Path, b: &Path) -> bool {
    a == b || (a.file_name().is_some() && a.file_name() == b.file_name())
}

fn hostname() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string())
}

fn operator() -> String {
    std::env::var("SUDO_USER")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_else(|_| "unknown".to_string())
}
