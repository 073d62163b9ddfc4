//! Shared lifecycle machinery: planning, backups, verification and rollback

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::backup::{BackupManager, BackupRequest, BackupStatus};
use crate::credentials::{CredentialProvisioner, KeyIssuer};
use crate::deploy::compose::{image_ref_var, ComposeComposer, ComposePlan, ComposeRequest, TargetScope};
use crate::deploy::executor::Executor;
use crate::deploy::fsm::{OperationEvent, OperationFsm};
use crate::deploy::health::{tokio_sleep, HealthMonitor, HealthTarget, SleepFn};
use crate::deploy::resolver::DependencyResolver;
use crate::errors::OrchestratorError;
use crate::http::ReleaseSource;
use crate::lifecycle::options::OrchestratorOptions;
use crate::prompt::Confirm;
use crate::registry::module::{is_infra_service, Module};
use crate::registry::ModuleRegistry;
use crate::storage::layout::InstallLayout;
use crate::storage::state::{DeploymentState, InfraMode, ModuleVersion};

/// Runs lifecycle operations against one install root
pub struct Orchestrator {
    pub(super) layout: InstallLayout,
    pub(super) registry: ModuleRegistry,
    pub(super) executor: Arc<dyn Executor>,
    pub(super) backups: BackupManager,
    pub(super) credentials: CredentialProvisioner,
    pub(super) releases: Option<Arc<dyn ReleaseSource>>,
    pub(super) confirm: Arc<dyn Confirm>,
    pub(super) sleep_fn: SleepFn,
}

impl Orchestrator {
    pub fn new(
        layout: InstallLayout,
        registry: ModuleRegistry,
        executor: Arc<dyn Executor>,
        issuer: Arc<dyn KeyIssuer>,
        confirm: Arc<dyn Confirm>,
    ) -> Self {
        Self {
            backups: BackupManager::new(layout.clone(), executor.clone()),
            credentials: CredentialProvisioner::new(issuer, confirm.clone()),
            layout,
            registry,
            executor,
            releases: None,
            confirm,
            sleep_fn: tokio_sleep(),
        }
    }

    pub fn with_release_source(mut self, releases: Arc<dyn ReleaseSource>) -> Self {
        self.releases = Some(releases);
        self
    }

    /// Replace the sleep used between health polls
    pub fn with_sleep_fn(mut self, sleep_fn: SleepFn) -> Self {
        self.sleep_fn = sleep_fn;
        self
    }

    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    // ============================== STATE ================================== //

    /// Whether the root holds an installation with at least one module
    pub async fn installation_present(&self) -> bool {
        let config = self.layout.config_file();
        if !config.exists().await {
            return false;
        }
        match DeploymentState::load(&config).await {
            Ok(state) => !state.installed.is_empty(),
            Err(_) => true,
        }
    }

    /// Load state of an existing installation
    pub(super) async fn load_installed_state(&self) -> Result<DeploymentState, OrchestratorError> {
        if !self.installation_present().await {
            return Err(OrchestratorError::Prerequisite(format!(
                "No installation found at {}; run install first",
                self.layout.base_dir.display()
            )));
        }
        DeploymentState::load(&self.layout.config_file()).await
    }

    pub(super) async fn save_state(&self, state: &DeploymentState) -> Result<(), OrchestratorError> {
        state.save(&self.layout.config_file()).await
    }

    /// Target version from the flag, else the release host
    pub(super) async fn target_version(&self, requested: Option<&str>) -> Result<String, OrchestratorError> {
        if let Some(version) = requested.map(str::trim).filter(|v| !v.is_empty()) {
            return Ok(version.to_string());
        }
        let Some(releases) = &self.releases else {
            return Err(OrchestratorError::Prerequisite(
                "No --version given and no release host configured (RELEASE_URL)".to_string(),
            ));
        };
        let version = releases.latest_version().await.map_err(|e| {
            OrchestratorError::Prerequisite(format!("Cannot determine the latest release: {}", e))
        })?;
        info!("Latest release is {}", version);
        Ok(version)
    }

    // ============================= PLANNING ================================= //

    pub(super) fn resolver(&self) -> DependencyResolver<'_> {
        DependencyResolver::new(&self.registry)
    }

    pub(super) async fn available_fragments(&self) -> Result<BTreeSet<String>, OrchestratorError> {
        let dir = self.layout.compose_dir();
        if !dir.exists().await {
            return Err(OrchestratorError::Prerequisite(format!(
                "Compose directory {} is missing",
                dir.path().display()
            )));
        }
        Ok(dir.list_file_names().await?.into_iter().collect())
    }

    /// Compose a plan and attach image references for every targeted module
    pub(super) fn compose_plan(
        &self,
        state: &DeploymentState,
        order: &[String],
        targets: &[String],
        scope: TargetScope,
        running: &BTreeSet<String>,
        available: &BTreeSet<String>,
    ) -> Result<ComposePlan, OrchestratorError> {
        let mut plan = ComposeComposer::new(&self.registry).compose(&ComposeRequest {
            order,
            infra_mode: state.infra_mode,
            performance_mode: state.performance_mode,
            targets,
            running,
            available,
            scope,
        })?;
        plan.env = self.image_env(state, &plan.services);
        Ok(plan)
    }

    /// `<MODULE>_IMAGE_REF` for each module service with a recorded version
    pub(super) fn image_env(&self, state: &DeploymentState, services: &[String]) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        for service in services {
            let (Some(module), Some(version)) = (self.registry.get(service), state.version(service)) else {
                continue;
            };
            let image = match state.image_override(service) {
                Some(over) if has_tag(over) => over.to_string(),
                Some(over) => format!("{}:{}", over, version.backend),
                None => module.image_ref(&version.backend),
            };
            env.insert(image_ref_var(service), image);
        }
        env
    }

    pub(super) fn health_targets(&self, services: &[String], options: &OrchestratorOptions) -> Vec<HealthTarget> {
        services
            .iter()
            .map(|service| {
                let timeout = if is_infra_service(service) {
                    options.infra_timeout
                } else if Some(service.as_str()) == self.registry.base() {
                    options.core_timeout
                } else {
                    options.module_timeout
                };
                HealthTarget {
                    service: service.clone(),
                    timeout,
                }
            })
            .collect()
    }

    pub(super) fn monitor(&self, options: &OrchestratorOptions) -> HealthMonitor {
        HealthMonitor::new(self.executor.clone(), options.poll_interval, self.sleep_fn.clone())
    }

    /// Pull (optionally) and start the plan's services
    pub(super) async fn apply(&self, plan: &ComposePlan, pull: bool) -> Result<(), OrchestratorError> {
        info!("Starting {}", plan.services.join(", "));
        if pull {
            self.executor.pull(plan).await?;
        }
        self.executor.up(plan).await
    }

    /// Wait for every service in the plan to become healthy
    pub(super) async fn verify(
        &self,
        services: &[String],
        options: &OrchestratorOptions,
    ) -> Result<(), OrchestratorError> {
        let targets = self.health_targets(services, options);
        self.monitor(options).verify(&targets).await.map(|_| ())
    }

    // ============================== BACKUP ================================== //

    /// Backing-up step.
    ///
    /// A failed or partial backup needs operator confirmation to continue.
    pub(super) async fn take_backup(
        &self,
        fsm: &mut OperationFsm,
        request: BackupRequest<'_>,
    ) -> Result<Option<PathBuf>, OrchestratorError> {
        match self.backups.create_backup(request).await {
            Ok(entry) => {
                let partial = entry
                    .metadata
                    .as_ref()
                    .map(|m| m.status == BackupStatus::Partial)
                    .unwrap_or(true);
                if partial
                    && !self.confirm.confirm(
                        &format!("Backup {} is incomplete. Continue anyway?", entry.id),
                        false,
                    )?
                {
                    advance(fsm, OperationEvent::Abort("incomplete backup".to_string()))?;
                    return Err(OrchestratorError::Backup(format!(
                        "backup {} is incomplete",
                        entry.path.display()
                    )));
                }
                advance(fsm, OperationEvent::BackedUp(entry.path.clone()))?;
                Ok(Some(entry.path))
            }
            Err(e) => {
                warn!("Backup failed: {}", e);
                if self.confirm.confirm(
                    "Backup failed. Continue without a backup (no automatic rollback)?",
                    false,
                )? {
                    advance(fsm, OperationEvent::BackupSkipped)?;
                    Ok(None)
                } else {
                    advance(fsm, OperationEvent::Abort(e.to_string()))?;
                    Err(match e {
                        OrchestratorError::Backup(_) => e,
                        other => OrchestratorError::Backup(other.to_string()),
                    })
                }
            }
        }
    }

    // ============================= RECOVERY ================================= //

    /// Handle a failure after mutation started.
    ///
    /// With a backup, roll back and report the outcome; without one, put the
    /// previous configuration back and abort.
    pub(super) async fn recover(
        &self,
        fsm: &mut OperationFsm,
        cause: OrchestratorError,
        previous: &DeploymentState,
        touched: &[String],
    ) -> OrchestratorError {
        error!("{}", cause);

        let backup = if fsm.can_roll_back() {
            fsm.backup().map(Path::to_path_buf)
        } else {
            None
        };
        let Some(backup) = backup else {
            if let Err(e) = self.save_state(previous).await {
                warn!("Could not restore previous configuration: {}", e);
            }
            if let Err(e) = fsm.process(OperationEvent::Abort(cause.to_string())) {
                warn!("{}", e);
            }
            return cause;
        };

        warn!("Rolling back to backup {}", backup.display());
        let result = self.rollback_to(&backup, touched).await;
        if let Err(e) = fsm.process(OperationEvent::RolledBack(cause.to_string())) {
            warn!("{}", e);
        }

        match result {
            Ok(_) => {
                info!("Rollback to {} succeeded", backup.display());
                OrchestratorError::RolledBack {
                    cause: Box::new(cause),
                    backup,
                }
            }
            Err(rollback) => {
                error!("Rollback failed: {}", rollback);
                OrchestratorError::RollbackFailed {
                    cause: Box::new(cause),
                    rollback: Box::new(rollback),
                    backup,
                }
            }
        }
    }

    /// Restore a backup and bring the previous module set back up.
    ///
    /// Infrastructure containers are never stopped. `touched` names the
    /// services the failed operation started or recreated.
    pub(super) async fn rollback_to(
        &self,
        backup: &Path,
        touched: &[String],
    ) -> Result<DeploymentState, OrchestratorError> {
        self.backups.mark_rollback_started(backup).await?;
        self.backups.restore_files(backup).await?;

        let previous = DeploymentState::load(&self.layout.config_file()).await?;
        let options = OrchestratorOptions::from_state(&previous);
        let available = self.available_fragments().await?;
        let running = self.executor.running_services().await?;

        let mut stop: Vec<String> = touched
            .iter()
            .filter(|s| !is_infra_service(s) && self.registry.contains(s))
            .cloned()
            .collect();
        for service in &running {
            if self.registry.contains(service) && !previous.is_installed(service) && !stop.contains(service) {
                stop.push(service.clone());
            }
        }

        if !stop.is_empty() {
            let mut scope: Vec<String> = previous.installed.clone();
            scope.extend(stop.iter().cloned());
            let order = self.resolver().resolve(&scope)?;
            let plan = self
                .compose_plan(&previous, &order, &stop, TargetScope::Selective, &running, &available)?
                .narrowed(stop.clone());
            info!("Stopping {}", stop.join(", "));
            self.executor.remove(&plan).await?;
        }

        let order = self.resolver().resolve(&previous.installed)?;
        let plan = self.compose_plan(
            &previous,
            &order,
            &previous.installed,
            TargetScope::Selective,
            &BTreeSet::new(),
            &available,
        )?;
        self.apply(&plan, false).await?;

        if previous.infra_mode == InfraMode::Full {
            self.backups.restore_database(backup).await?;
        }

        self.verify(&plan.services, &options).await?;
        self.backups.mark_rollback_finished().await?;
        Ok(previous)
    }

    /// Best-effort work after a commit
    pub(super) async fn after_commit(&self, options: &OrchestratorOptions) {
        if let Err(e) = self.executor.prune_images().await {
            warn!("Image prune failed: {}", e);
        }
        match self.backups.cleanup(options.backup_retention).await {
            Ok(deleted) if !deleted.is_empty() => info!("Removed {} old backups", deleted.len()),
            Ok(_) => {}
            Err(e) => warn!("Backup cleanup failed: {}", e),
        }
    }
}

/// Apply an FSM event, treating an invalid transition as a bug
pub(super) fn advance(fsm: &mut OperationFsm, event: OperationEvent) -> Result<(), OrchestratorError> {
    fsm.process(event).map_err(OrchestratorError::Internal)
}

/// Version record for a module at `version`
pub(super) fn module_version(module: &Module, version: &str) -> ModuleVersion {
    if module.has_frontend {
        ModuleVersion::paired(version)
    } else {
        ModuleVersion::new(version)
    }
}

/// Whether an image reference carries a tag (`repo:tag`, not `host:port/repo`)
fn has_tag(image: &str) -> bool {
    let last = image.rsplit('/').next().unwrap_or(image);
    last.contains(':') || last.contains('@')
}
