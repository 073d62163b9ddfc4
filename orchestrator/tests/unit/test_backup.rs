//! Backup manager tests

mod support;

use std::path::PathBuf;

use chrono::Utc;

use suitectl::backup::{BackupManager, BackupRequest, BackupStatus, PieceStatus, RollbackRecord};
use suitectl::errors::OrchestratorError;
use suitectl::storage::state::InfraMode;
use suitectl::utils::sha256_hash;

use support::{installed_root, installed_state, FakeExecutor, DUMP};

#[tokio::test]
async fn test_backup_then_restore_leaves_config_identical() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::Full, &["core", "items"]).await;
    let manager = BackupManager::new(layout.clone(), executor.clone());
    let original = std::fs::read(layout.config_file().path()).unwrap();

    let entry = manager.create_backup(BackupRequest::new("test")).await.unwrap();
    let metadata = entry.metadata.clone().unwrap();
    assert_eq!(metadata.status, BackupStatus::Complete);
    assert_eq!(metadata.pieces.database, PieceStatus::Captured);
    assert_eq!(metadata.pieces.config, PieceStatus::Captured);
    assert_eq!(metadata.config_sha256.as_deref(), Some(sha256_hash(&original).as_str()));
    assert_eq!(metadata.installed, vec!["core", "items"]);
    assert_eq!(metadata.from_version.as_deref(), Some("1.0.0"));
    assert_eq!(
        std::fs::read_to_string(entry.path.join("database.sql")).unwrap(),
        DUMP
    );

    let report = manager.restore_backup(&entry.path).await.unwrap();
    assert!(report.restored.contains(&"config".to_string()));
    assert!(report.restored.contains(&"database".to_string()));
    assert_eq!(std::fs::read(layout.config_file().path()).unwrap(), original);
    assert_eq!(executor.stdin_for("postgres"), vec![DUMP.as_bytes().to_vec()]);
}

#[tokio::test]
async fn test_restore_reverts_config_changes() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::Full, &["core"]).await;
    let manager = BackupManager::new(layout.clone(), executor.clone());
    let original = std::fs::read(layout.config_file().path()).unwrap();

    let entry = manager.create_backup(BackupRequest::new("test")).await.unwrap();
    installed_state(InfraMode::Full, &["core", "crm"], "2.0.0")
        .save(&layout.config_file())
        .await
        .unwrap();
    std::fs::write(layout.uploads_dir().path().join("late.txt"), "new").unwrap();

    manager.restore_files(&entry.path).await.unwrap();
    assert_eq!(std::fs::read(layout.config_file().path()).unwrap(), original);
    assert!(!layout.uploads_dir().path().join("late.txt").exists());
}

#[tokio::test]
async fn test_external_infra_skips_database() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::External, &["core"]).await;
    let manager = BackupManager::new(layout.clone(), executor.clone());

    let entry = manager.create_backup(BackupRequest::new("test")).await.unwrap();
    let metadata = entry.metadata.unwrap();

    assert!(matches!(metadata.pieces.database, PieceStatus::Skipped(_)));
    assert_eq!(metadata.status, BackupStatus::Complete);
    assert!(!entry.path.join("database.sql").exists());
    assert!(executor.calls_of("exec").is_empty());
}

#[tokio::test]
async fn test_failed_dump_makes_backup_partial() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::Full, &["core"]).await;
    executor.fail_exec(true);
    let manager = BackupManager::new(layout.clone(), executor.clone());

    let entry = manager.create_backup(BackupRequest::new("test")).await.unwrap();
    let metadata = manager.metadata(&entry.path).await.unwrap();

    assert_eq!(metadata.status, BackupStatus::Partial);
    assert!(metadata.pieces.database.is_failed());
    assert_eq!(metadata.pieces.config, PieceStatus::Captured);
}

#[tokio::test]
async fn test_secrets_are_never_backed_up() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::Full, &["core"]).await;
    std::fs::write(layout.secrets_file().path(), "POSTGRES_PASSWORD=hunter2\n").unwrap();
    let manager = BackupManager::new(layout.clone(), executor.clone());

    let entry = manager.create_backup(BackupRequest::new("test")).await.unwrap();
    for file in walk(&entry.path) {
        let contents = std::fs::read_to_string(&file).unwrap_or_default();
        assert!(!contents.contains("hunter2"), "secret leaked into {}", file.display());
    }
}

#[tokio::test]
async fn test_cleanup_keeps_newest_and_rollback_target() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::External, &["core"]).await;
    let manager = BackupManager::new(layout.clone(), executor.clone());

    let mut created = Vec::new();
    for _ in 0..5 {
        created.push(manager.create_backup(BackupRequest::new("test")).await.unwrap());
    }
    let oldest = created[0].path.clone();
    let record = RollbackRecord {
        from_version: Some("1.0.0".to_string()),
        to_version: "2.0.0".to_string(),
        from_versions: Default::default(),
        modules: vec!["core".to_string()],
        backup_path: oldest.clone(),
        created_at: Utc::now(),
    };
    manager.attach_rollback_record(&oldest, &record).await.unwrap();

    let listed = manager.list_backups().await.unwrap();
    assert_eq!(listed.len(), 5);
    assert_eq!(listed[0].id, created[4].id);
    assert_eq!(listed[4].id, created[0].id);

    let deleted = manager.cleanup(2).await.unwrap();
    assert!(deleted.len() <= 3);
    assert!(!deleted.contains(&oldest));
    assert!(oldest.exists());
    assert!(created[4].path.exists());
    assert!(created[3].path.exists());
    assert_eq!(manager.list_backups().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_cleanup_spares_backup_of_unfinished_rollback() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::External, &["core"]).await;
    let manager = BackupManager::new(layout.clone(), executor.clone());

    let mut created = Vec::new();
    for _ in 0..4 {
        created.push(manager.create_backup(BackupRequest::new("test")).await.unwrap());
    }
    let restoring = created[0].path.clone();
    manager.mark_rollback_started(&restoring).await.unwrap();
    assert_eq!(manager.rollback_in_progress().await, Some(restoring.clone()));

    let deleted = manager.cleanup(1).await.unwrap();
    assert_eq!(deleted.len(), 2);
    assert!(restoring.exists());
    assert!(created[3].path.exists());
    assert!(!created[1].path.exists());
    assert!(!created[2].path.exists());

    manager.mark_rollback_finished().await.unwrap();
    assert_eq!(manager.cleanup(1).await.unwrap(), vec![restoring]);
}

#[tokio::test]
async fn test_locate_unknown_backup() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::External, &["core"]).await;
    let manager = BackupManager::new(layout, executor.clone());

    let err = manager.locate("19990101-000000").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}

fn walk(dir: &std::path::Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            files.extend(walk(&path));
        } else {
            files.push(path);
        }
    }
    files
}
