//! End-to-end lifecycle tests against the in-memory executor

mod support;

use std::collections::BTreeSet;

use secrecy::ExposeSecret;

use suitectl::credentials::InfraSecrets;
use suitectl::deploy::fsm::OperationState;
use suitectl::deploy::health::HealthVerdict;
use suitectl::errors::OrchestratorError;
use suitectl::registry::ModuleRegistry;
use suitectl::lifecycle::{
    AddModuleOptions, InstallOptions, RemoveModuleOptions, RotateOptions, UpgradeOptions,
};
use suitectl::storage::state::{DeploymentState, InfraMode};

use support::{empty_root, installed_root, orchestrator, FakeExecutor, FakeKeyIssuer};

const ACME_REPORTS: &str = r#"
version: "1.1"
module:
  name: acme-reports
image:
  repository: registry.acme.test/reports
  tag: 2.3.0
port: 8100
dependencies:
  modules: [items]
  services: [postgres]
frontend:
  bundle: reports-ui.tar.gz
  mount: /reports
environment:
  - name: ACME_LICENSE
    description: License token
    placeholder: changeme
    sensitive: true
"#;

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

async fn load_state(layout: &suitectl::storage::layout::InstallLayout) -> DeploymentState {
    DeploymentState::load(&layout.config_file()).await.unwrap()
}

// ================================ INSTALL ================================== //

#[tokio::test]
async fn test_fresh_install() {
    let executor = FakeExecutor::new();
    let issuer = FakeKeyIssuer::new();
    let (_dir, layout) = empty_root();
    let orch = orchestrator(&layout, executor.clone(), issuer.clone(), false);

    let report = orch
        .install(&InstallOptions {
            version: Some("1.0.0".to_string()),
            infra_mode: InfraMode::Full,
            modules: vec!["crm".to_string()],
            force: false,
        })
        .await
        .unwrap();

    assert_eq!(report.state, OperationState::Committed);
    assert!(report.backup.is_none());

    let state = load_state(&layout).await;
    assert_eq!(state.installed, vec!["core", "items", "bp", "crm"]);
    assert_eq!(state.version("crm").unwrap().backend, "1.0.0");
    assert_eq!(state.api_key("CRM_API_KEY"), Some("key-crm"));
    assert!(state.deployment_secret().is_some());
    assert!(state.encryption_key().is_some());
    assert_eq!(issuer.issued(), vec!["items", "bp", "crm"]);

    for service in ["postgres", "redis", "rabbitmq", "core", "items", "bp", "crm"] {
        assert!(executor.is_running(service), "{} not running", service);
    }
    assert_eq!(executor.image("crm").as_deref(), Some("ghcr.io/suite/crm:1.0.0"));
    assert!(layout.secrets_file().exists().await);
}

#[tokio::test]
async fn test_install_refuses_existing_installation() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::Full, &["core"]).await;
    let orch = orchestrator(&layout, executor.clone(), FakeKeyIssuer::new(), false);

    let err = orch
        .install(&InstallOptions {
            version: Some("1.0.0".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 2);
    assert!(executor.calls_of("up").is_empty());
}

// =============================== ADD MODULE ================================ //

#[tokio::test]
async fn test_add_installed_healthy_module_is_noop() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::Full, &["core", "items", "bp", "crm"]).await;
    let before = std::fs::read(layout.config_file().path()).unwrap();
    let mut orch = orchestrator(&layout, executor.clone(), FakeKeyIssuer::new(), false);

    let report = orch
        .add_module(&AddModuleOptions {
            name: "crm".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(report.no_change);
    assert!(report.backup.is_none());
    assert!(executor.calls_of("up").is_empty());
    assert!(orch.list_backups().await.unwrap().is_empty());
    assert_eq!(std::fs::read(layout.config_file().path()).unwrap(), before);
}

#[tokio::test]
async fn test_add_module_with_missing_dependencies() {
    let executor = FakeExecutor::new();
    let issuer = FakeKeyIssuer::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::Full, &["core"]).await;
    let mut orch = orchestrator(&layout, executor.clone(), issuer.clone(), false);

    let report = orch
        .add_module(&AddModuleOptions {
            name: "prospects".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(report.state, OperationState::Committed);
    assert!(report.backup.is_some());

    let state = load_state(&layout).await;
    assert_eq!(state.installed, vec!["core", "items", "bp", "prospects"]);
    assert_eq!(state.api_key("PROSPECTS_API_KEY"), Some("key-prospects"));
    assert_eq!(issuer.issued(), vec!["items", "bp", "prospects"]);
    assert_eq!(executor.touched_by("up"), set(&["core", "items", "bp", "prospects"]));
    assert!(!executor.touched_by("up").contains("postgres"));
}

#[tokio::test]
async fn test_add_module_explicit_key_skips_issuer() {
    let executor = FakeExecutor::new();
    let issuer = FakeKeyIssuer::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::Full, &["core", "items", "bp"]).await;
    let mut orch = orchestrator(&layout, executor.clone(), issuer.clone(), false);

    orch.add_module(&AddModuleOptions {
        name: "crm".to_string(),
        api_key: Some("operator-key".to_string()),
        ..Default::default()
    })
    .await
    .unwrap();

    assert_eq!(load_state(&layout).await.api_key("CRM_API_KEY"), Some("operator-key"));
    assert!(issuer.issued().is_empty());
}

#[tokio::test]
async fn test_add_module_declined_without_key_rolls_back() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::Full, &["core", "items", "bp"]).await;
    let before = std::fs::read(layout.config_file().path()).unwrap();
    let mut orch = orchestrator(&layout, executor.clone(), FakeKeyIssuer::failing(), false);

    let err = orch
        .add_module(&AddModuleOptions {
            name: "crm".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), 8);
    assert!(err.recovery_backup().is_some());
    assert!(!executor.is_running("crm"));
    assert_eq!(std::fs::read(layout.config_file().path()).unwrap(), before);
}

#[tokio::test]
async fn test_add_module_moves_to_requested_version() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::Full, &["core", "items", "bp", "crm"]).await;
    let mut orch = orchestrator(&layout, executor.clone(), FakeKeyIssuer::new(), false);

    let report = orch
        .add_module(&AddModuleOptions {
            name: "crm".to_string(),
            version: Some("2.0.0".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(!report.no_change);
    assert_eq!(report.state, OperationState::Committed);
    assert_eq!(load_state(&layout).await.version("crm").unwrap().backend, "2.0.0");
    assert_eq!(executor.image("crm").as_deref(), Some("ghcr.io/suite/crm:2.0.0"));
}

// ============================ CUSTOMER MODULES ============================= //

#[tokio::test]
async fn test_add_customer_module_then_upgrade_from_manifest() {
    let executor = FakeExecutor::new();
    let (dir, layout) = installed_root(&executor, InfraMode::Full, &["core", "items"]).await;
    let manifest_path = dir.path().join("acme-reports.yaml");
    std::fs::write(&manifest_path, ACME_REPORTS).unwrap();
    let mut orch = orchestrator(&layout, executor.clone(), FakeKeyIssuer::new(), false);

    let report = orch
        .add_module(&AddModuleOptions {
            name: "acme-reports".to_string(),
            manifest: Some(manifest_path),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(report.state, OperationState::Committed);
    assert!(report.notes.iter().any(|n| n.contains("ACME_LICENSE")));

    assert!(layout.module_manifest("acme-reports").exists().await);
    assert!(layout.compose_dir().file("docker-compose.acme-reports.yml").exists().await);

    let state = load_state(&layout).await;
    assert_eq!(state.installed, vec!["core", "items", "acme-reports"]);
    assert_eq!(state.get("ACME_LICENSE"), Some("changeme"));
    assert_eq!(state.api_key("ACME_REPORTS_API_KEY"), Some("key-acme-reports"));
    assert_eq!(state.version("acme-reports").unwrap().backend, "2.3.0");
    assert_eq!(
        executor.image("acme-reports").as_deref(),
        Some("registry.acme.test/reports:2.3.0")
    );

    // A new tag in the stored manifest drives the upgrade, not the suite version
    std::fs::write(
        layout.module_manifest("acme-reports").path(),
        ACME_REPORTS.replace("tag: 2.3.0", "tag: 2.4.0"),
    )
    .unwrap();
    orch.upgrade(&UpgradeOptions {
        version: Some("1.1.0".to_string()),
        modules: vec!["acme-reports".to_string()],
        ..Default::default()
    })
    .await
    .unwrap();

    let state = load_state(&layout).await;
    assert_eq!(state.version("acme-reports").unwrap().backend, "2.4.0");
    assert_eq!(state.version("core").unwrap().backend, "1.0.0");
    assert_eq!(
        executor.image("acme-reports").as_deref(),
        Some("registry.acme.test/reports:2.4.0")
    );
}

#[tokio::test]
async fn test_failed_customer_module_leaves_no_manifest_behind() {
    let executor = FakeExecutor::new();
    let (dir, layout) = installed_root(&executor, InfraMode::Full, &["core", "items"]).await;
    let manifest_path = dir.path().join("acme-reports.yaml");
    std::fs::write(&manifest_path, ACME_REPORTS).unwrap();
    let mut orch = orchestrator(&layout, executor.clone(), FakeKeyIssuer::failing(), false);

    let err = orch
        .add_module(&AddModuleOptions {
            name: "acme-reports".to_string(),
            manifest: Some(manifest_path),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 8);

    assert!(!layout.modules_dir().subdir("acme-reports").exists().await);
    assert!(!layout.compose_dir().file("docker-compose.acme-reports.yml").exists().await);
    let registry = ModuleRegistry::load(&layout).await.unwrap();
    assert!(!registry.contains("acme-reports"));
}

#[tokio::test]
async fn test_registry_loads_customer_modules_in_any_order() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::Full, &["core", "items"]).await;
    let analytics = ACME_REPORTS
        .replace("name: acme-reports", "name: analytics")
        .replace("modules: [items]", "modules: [reports]");
    let reports = ACME_REPORTS.replace("name: acme-reports", "name: reports");
    for (name, doc) in [("analytics", analytics), ("reports", reports)] {
        let dir = layout.modules_dir().subdir(name);
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(layout.module_manifest(name).path(), doc).unwrap();
    }

    let registry = ModuleRegistry::load(&layout).await.unwrap();
    assert_eq!(registry.require("analytics").unwrap().dependencies, vec!["reports"]);
    assert!(registry.contains("reports"));
}

// ================================ UPGRADE ================================== //

#[tokio::test]
async fn test_failed_upgrade_rolls_back_to_previous_version() {
    let executor = FakeExecutor::new();
    executor.fail_images_containing("bad");
    let (_dir, layout) = installed_root(&executor, InfraMode::Full, &["core", "items", "bp", "crm"]).await;
    let before = std::fs::read(layout.config_file().path()).unwrap();
    let mut orch = orchestrator(&layout, executor.clone(), FakeKeyIssuer::new(), false);

    let err = orch
        .upgrade(&UpgradeOptions {
            version: Some("2.0.0-bad".to_string()),
            modules: vec!["crm".to_string()],
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::RolledBack { .. }));
    assert_eq!(err.exit_code(), 6);
    let backup = err.recovery_backup().cloned().unwrap();
    assert!(backup.exists());

    // Previous version is back and healthy
    assert_eq!(executor.image("crm").as_deref(), Some("ghcr.io/suite/crm:1.0.0"));
    assert!(executor.is_running("crm"));
    assert_eq!(std::fs::read(layout.config_file().path()).unwrap(), before);
    assert!(orch.status().await.unwrap().all_healthy());

    // Infrastructure and unrelated modules were never stopped
    let stopped: BTreeSet<String> = executor
        .touched_by("stop")
        .union(&executor.touched_by("remove"))
        .cloned()
        .collect();
    for untouched in ["postgres", "redis", "rabbitmq", "items", "bp"] {
        assert!(!stopped.contains(untouched), "{} was stopped", untouched);
    }

    // Database replayed from the backup
    assert_eq!(executor.stdin_for("postgres").len(), 1);
    assert!(!layout.rollback_marker().exists().await);
}

#[tokio::test]
async fn test_failed_rollback_is_reported_and_not_retried() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::Full, &["core", "items", "bp", "crm"]).await;
    executor.script_health("crm", &[HealthVerdict::Unhealthy]);
    let mut orch = orchestrator(&layout, executor.clone(), FakeKeyIssuer::new(), false);

    let err = orch
        .upgrade(&UpgradeOptions {
            version: Some("2.0.0".to_string()),
            modules: vec!["crm".to_string()],
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::RollbackFailed { .. }));
    assert_eq!(err.exit_code(), 7);
    assert!(err.recovery_backup().is_some());

    // One rollback attempt, left marked as unfinished
    assert_eq!(executor.calls_of("remove").len(), 1);
    assert!(layout.rollback_marker().exists().await);
}

#[tokio::test]
async fn test_selective_upgrade_touches_module_and_base_only() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::Full, &["core", "items", "bp", "crm"]).await;
    let mut orch = orchestrator(&layout, executor.clone(), FakeKeyIssuer::new(), false);

    let report = orch
        .upgrade(&UpgradeOptions {
            version: Some("1.1.0".to_string()),
            modules: vec!["crm".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(report.state, OperationState::Committed);

    assert_eq!(executor.touched_by("pull"), set(&["core", "crm"]));
    assert_eq!(executor.touched_by("up"), set(&["core", "crm"]));
    assert_eq!(executor.touched_by("stop"), set(&["crm"]));
    assert!(executor.touched_by("remove").is_empty());

    let state = load_state(&layout).await;
    assert_eq!(state.version("crm").unwrap().backend, "1.1.0");
    assert_eq!(state.version("items").unwrap().backend, "1.0.0");
    assert_eq!(state.version("core").unwrap().backend, "1.0.0");
    assert_eq!(executor.image("crm").as_deref(), Some("ghcr.io/suite/crm:1.1.0"));

    let record = orch.backups().latest_rollback_record().await.unwrap().unwrap();
    assert_eq!(record.to_version, "1.1.0");
    assert_eq!(record.modules, vec!["crm"]);
}

#[tokio::test]
async fn test_upgrade_rollback_restores_previous_release() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::Full, &["core", "items"]).await;
    let before = std::fs::read(layout.config_file().path()).unwrap();
    let mut orch = orchestrator(&layout, executor.clone(), FakeKeyIssuer::new(), false);

    orch.upgrade(&UpgradeOptions {
        version: Some("2.0.0".to_string()),
        ..Default::default()
    })
    .await
    .unwrap();
    assert_eq!(executor.image("items").as_deref(), Some("ghcr.io/suite/items:2.0.0"));

    let report = orch
        .upgrade(&UpgradeOptions {
            rollback: true,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(report.state, OperationState::Committed);
    assert_eq!(std::fs::read(layout.config_file().path()).unwrap(), before);
    assert_eq!(executor.image("items").as_deref(), Some("ghcr.io/suite/items:1.0.0"));
    assert_eq!(executor.image("core").as_deref(), Some("ghcr.io/suite/core:1.0.0"));
}

#[tokio::test]
async fn test_upgrade_to_current_version_is_noop() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::Full, &["core", "items"]).await;
    let mut orch = orchestrator(&layout, executor.clone(), FakeKeyIssuer::new(), false);

    let report = orch
        .upgrade(&UpgradeOptions {
            version: Some("1.0.0".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(report.no_change);
    assert!(executor.calls_of("up").is_empty());
}

#[tokio::test]
async fn test_upgrade_without_version_or_release_host() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::Full, &["core"]).await;
    let mut orch = orchestrator(&layout, executor.clone(), FakeKeyIssuer::new(), false);

    let err = orch.upgrade(&UpgradeOptions::default()).await.unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

// ============================= REMOVE MODULE =============================== //

#[tokio::test]
async fn test_remove_base_service_refused() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::Full, &["core", "items"]).await;
    let orch = orchestrator(&layout, executor.clone(), FakeKeyIssuer::new(), false);

    let err = orch
        .remove_module(&RemoveModuleOptions {
            name: "core".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Prerequisite(_)));
    assert!(executor.calls_of("remove").is_empty());
}

#[tokio::test]
async fn test_remove_module_with_dependents_refused() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::Full, &["core", "items", "bp", "crm"]).await;
    let orch = orchestrator(&layout, executor.clone(), FakeKeyIssuer::new(), false);

    let err = orch
        .remove_module(&RemoveModuleOptions {
            name: "items".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 2);
    assert!(err.to_string().contains("bp"));
    assert!(executor.is_running("items"));
}

#[tokio::test]
async fn test_remove_module() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::Full, &["core", "items", "bp", "crm"]).await;
    let orch = orchestrator(&layout, executor.clone(), FakeKeyIssuer::new(), false);

    let report = orch
        .remove_module(&RemoveModuleOptions {
            name: "crm".to_string(),
            remove_key: true,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(report.state, OperationState::Committed);
    assert!(!executor.is_running("crm"));
    assert_eq!(executor.touched_by("remove"), set(&["crm"]));

    let state = load_state(&layout).await;
    assert_eq!(state.installed, vec!["core", "items", "bp"]);
    assert!(state.version("crm").is_none());
    assert!(state.api_key("CRM_API_KEY").is_none());
}

#[tokio::test]
async fn test_remove_module_not_installed_is_noop() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::Full, &["core"]).await;
    let orch = orchestrator(&layout, executor.clone(), FakeKeyIssuer::new(), false);

    let report = orch
        .remove_module(&RemoveModuleOptions {
            name: "crm".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(report.no_change);
}

// ========================= ROTATION AND STATUS ============================= //

#[tokio::test]
async fn test_rotate_credentials() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::Full, &["core", "items"]).await;
    let old = InfraSecrets::generate();
    old.save(&layout.secrets_file()).await.unwrap();
    let orch = orchestrator(&layout, executor.clone(), FakeKeyIssuer::new(), false);

    let dry = orch
        .rotate_credentials(&RotateOptions {
            dry_run: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(dry.no_change);
    assert!(executor.calls_of("exec").is_empty());

    orch.rotate_credentials(&RotateOptions::default()).await.unwrap();

    let new = InfraSecrets::load(&layout.secrets_file()).await.unwrap();
    assert_ne!(new.postgres_password.expose_secret(), old.postgres_password.expose_secret());
    assert_ne!(new.rabbitmq_password.expose_secret(), old.rabbitmq_password.expose_secret());

    let sql = String::from_utf8(executor.stdin_for("postgres")[0].clone()).unwrap();
    assert!(sql.contains(new.postgres_password.expose_secret()));
    let broker = String::from_utf8(executor.stdin_for("rabbitmq")[0].clone()).unwrap();
    assert_eq!(broker.trim(), new.rabbitmq_password.expose_secret());

    assert_eq!(executor.touched_by("up"), set(&["core", "items"]));
}

#[tokio::test]
async fn test_failed_rotation_restores_previous_passwords() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::Full, &["core", "items"]).await;
    let old = InfraSecrets::generate();
    old.save(&layout.secrets_file()).await.unwrap();
    executor.script_health("items", &[HealthVerdict::Unhealthy, HealthVerdict::Healthy]);
    let orch = orchestrator(&layout, executor.clone(), FakeKeyIssuer::new(), false);

    let err = orch.rotate_credentials(&RotateOptions::default()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::RolledBack { .. }));
    assert_eq!(err.exit_code(), 6);

    let current = InfraSecrets::load(&layout.secrets_file()).await.unwrap();
    assert_eq!(current.postgres_password.expose_secret(), old.postgres_password.expose_secret());
    assert_eq!(current.rabbitmq_password.expose_secret(), old.rabbitmq_password.expose_secret());

    // New passwords applied first, then the old ones put back
    let sql = executor.stdin_for("postgres");
    assert_eq!(sql.len(), 2);
    assert!(!String::from_utf8(sql[0].clone()).unwrap().contains(old.postgres_password.expose_secret()));
    assert!(String::from_utf8(sql[1].clone()).unwrap().contains(old.postgres_password.expose_secret()));
    let broker = executor.stdin_for("rabbitmq");
    assert_eq!(String::from_utf8(broker[1].clone()).unwrap().trim(), old.rabbitmq_password.expose_secret());
}

#[tokio::test]
async fn test_rotate_requires_full_infra() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::External, &["core"]).await;
    let orch = orchestrator(&layout, executor.clone(), FakeKeyIssuer::new(), false);

    let err = orch.rotate_credentials(&RotateOptions::default()).await.unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn test_status_reports_health() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = installed_root(&executor, InfraMode::Full, &["core", "items"]).await;
    executor.script_health("items", &[HealthVerdict::Unhealthy]);
    let orch = orchestrator(&layout, executor.clone(), FakeKeyIssuer::new(), false);

    let status = orch.status().await.unwrap();
    assert_eq!(status.modules.len(), 2);
    assert_eq!(status.infrastructure.len(), 3);
    assert_eq!(status.modules[0].version.as_deref(), Some("1.0.0"));
    assert_eq!(status.modules[1].health, HealthVerdict::Unhealthy);
    assert!(!status.all_healthy());
}

#[tokio::test]
async fn test_operations_need_installation() {
    let executor = FakeExecutor::new();
    let (_dir, layout) = empty_root();
    let orch = orchestrator(&layout, executor.clone(), FakeKeyIssuer::new(), false);

    let err = orch.status().await.unwrap_err();
    assert_eq!(err.exit_code(), 2);
}
