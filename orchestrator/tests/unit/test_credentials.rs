//! Credential provisioning tests

mod support;

use std::sync::Arc;

use secrecy::ExposeSecret;

use suitectl::credentials::{CredentialProvisioner, InfraSecrets, ProvisionOutcome};
use suitectl::errors::OrchestratorError;
use suitectl::filesys::file::File;
use suitectl::prompt::FixedConfirm;
use suitectl::registry::ModuleRegistry;
use suitectl::storage::state::{DeploymentState, InfraMode, KEY_DEPLOYMENT_SECRET};

use support::FakeKeyIssuer;

fn state_with_secret() -> DeploymentState {
    let mut state = DeploymentState::new(InfraMode::Full);
    state.set(KEY_DEPLOYMENT_SECRET, "secret");
    state
}

#[tokio::test]
async fn test_explicit_key_wins() {
    let issuer = FakeKeyIssuer::new();
    let provisioner = CredentialProvisioner::new(issuer.clone(), Arc::new(FixedConfirm(false)));
    let registry = ModuleRegistry::builtin();
    let crm = registry.require("crm").unwrap();

    let mut state = state_with_secret();
    state.set("CRM_API_KEY", "stored");
    let outcome = provisioner
        .get_or_provision(&mut state, crm, Some("explicit"))
        .await
        .unwrap();

    assert_eq!(outcome, ProvisionOutcome::Explicit);
    assert_eq!(state.api_key("CRM_API_KEY"), Some("explicit"));
    assert!(issuer.issued().is_empty());
}

#[tokio::test]
async fn test_stored_key_is_reused() {
    let issuer = FakeKeyIssuer::new();
    let provisioner = CredentialProvisioner::new(issuer.clone(), Arc::new(FixedConfirm(false)));
    let registry = ModuleRegistry::builtin();

    let mut state = state_with_secret();
    state.set("BP_API_KEY", "stored");
    let outcome = provisioner
        .get_or_provision(&mut state, registry.require("bp").unwrap(), None)
        .await
        .unwrap();

    assert_eq!(outcome, ProvisionOutcome::Existing);
    assert_eq!(state.api_key("BP_API_KEY"), Some("stored"));
    assert!(issuer.issued().is_empty());
}

#[tokio::test]
async fn test_key_minted_by_base_service() {
    let issuer = FakeKeyIssuer::new();
    let provisioner = CredentialProvisioner::new(issuer.clone(), Arc::new(FixedConfirm(false)));
    let registry = ModuleRegistry::builtin();

    let mut state = state_with_secret();
    let outcome = provisioner
        .get_or_provision(&mut state, registry.require("items").unwrap(), None)
        .await
        .unwrap();

    assert_eq!(outcome, ProvisionOutcome::Minted);
    assert_eq!(state.api_key("ITEMS_API_KEY"), Some("key-items"));
    assert_eq!(issuer.issued(), vec!["items"]);
}

#[tokio::test]
async fn test_base_service_needs_no_key() {
    let provisioner = CredentialProvisioner::new(FakeKeyIssuer::new(), Arc::new(FixedConfirm(false)));
    let registry = ModuleRegistry::builtin();

    let mut state = state_with_secret();
    let outcome = provisioner
        .get_or_provision(&mut state, registry.require("core").unwrap(), None)
        .await
        .unwrap();
    assert_eq!(outcome, ProvisionOutcome::NotRequired);
}

#[tokio::test]
async fn test_degraded_mode_declined() {
    let provisioner = CredentialProvisioner::new(FakeKeyIssuer::failing(), Arc::new(FixedConfirm(false)));
    let registry = ModuleRegistry::builtin();

    let mut state = state_with_secret();
    let err = provisioner
        .get_or_provision(&mut state, registry.require("crm").unwrap(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Credential(_)));
    assert_eq!(err.exit_code(), 8);
    assert!(state.api_key("CRM_API_KEY").is_none());
}

#[tokio::test]
async fn test_degraded_mode_accepted() {
    let provisioner = CredentialProvisioner::new(FakeKeyIssuer::failing(), Arc::new(FixedConfirm(true)));
    let registry = ModuleRegistry::builtin();

    let mut state = state_with_secret();
    let outcome = provisioner
        .get_or_provision(&mut state, registry.require("crm").unwrap(), None)
        .await
        .unwrap();

    assert_eq!(outcome, ProvisionOutcome::Degraded);
    assert!(!outcome.has_key());
    assert!(state.api_key("CRM_API_KEY").is_none());
}

#[tokio::test]
async fn test_no_deployment_secret_degrades() {
    let issuer = FakeKeyIssuer::new();
    let provisioner = CredentialProvisioner::new(issuer.clone(), Arc::new(FixedConfirm(true)));
    let registry = ModuleRegistry::builtin();

    let mut state = DeploymentState::new(InfraMode::Full);
    let outcome = provisioner
        .get_or_provision(&mut state, registry.require("crm").unwrap(), None)
        .await
        .unwrap();

    assert_eq!(outcome, ProvisionOutcome::Degraded);
    assert!(issuer.issued().is_empty());
}

#[tokio::test]
async fn test_infra_secrets_saved_owner_only() {
    let dir = tempfile::tempdir().unwrap();
    let file = File::new(dir.path().join("secrets.env"));

    let generated = InfraSecrets::load_or_generate(&file).await.unwrap();
    let loaded = InfraSecrets::load_or_generate(&file).await.unwrap();
    assert_eq!(
        generated.postgres_password.expose_secret(),
        loaded.postgres_password.expose_secret()
    );
    assert_eq!(loaded.postgres_user, "suite");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

#[tokio::test]
async fn test_missing_secrets_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = InfraSecrets::load(&File::new(dir.path().join("secrets.env")))
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 8);
}
