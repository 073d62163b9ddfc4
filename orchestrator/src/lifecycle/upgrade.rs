//! Upgrade installed modules

use chrono::Utc;
use tracing::{info, warn};

use crate::backup::{BackupRequest, RollbackRecord};
use crate::deploy::compose::{ComposePlan, TargetScope};
use crate::deploy::fsm::{OperationEvent, OperationFsm};
use crate::errors::OrchestratorError;
use crate::lifecycle::options::OrchestratorOptions;
use crate::lifecycle::orchestrator::{advance, module_version, Orchestrator};
use crate::lifecycle::report::OperationReport;
use crate::registry::manifest::ModuleManifest;
use crate::registry::module::ModuleSource;
use crate::storage::state::{DeploymentState, ModuleVersion};

#[derive(Debug, Clone, Default)]
pub struct UpgradeOptions {
    pub version: Option<String>,
    /// Upgrade only these modules; empty upgrades everything installed
    pub modules: Vec<String>,
    /// Roll back to the most recent pre-upgrade backup instead
    pub rollback: bool,
    pub skip_backup: bool,
    /// Recreate even when versions already match
    pub force: bool,
}

impl Orchestrator {
    /// Move installed modules to a new version
    pub async fn upgrade(&mut self, opts: &UpgradeOptions) -> Result<OperationReport, OrchestratorError> {
        if opts.rollback {
            return self.rollback_latest().await;
        }

        let mut fsm = OperationFsm::new();
        let mut notes = Vec::new();

        // Validating
        self.executor.check_available().await?;
        let previous = self.load_installed_state().await?;
        let version = self.target_version(opts.version.as_deref()).await?;

        let selective = !opts.modules.is_empty();
        let targets = if selective {
            let mut targets: Vec<String> = Vec::new();
            for name in &opts.modules {
                self.registry.require(name)?;
                if !previous.is_installed(name) {
                    return Err(OrchestratorError::Prerequisite(format!(
                        "{} is not installed; use add-module",
                        name
                    )));
                }
                if !targets.contains(name) {
                    targets.push(name.clone());
                }
            }
            targets
        } else {
            previous.installed.clone()
        };

        let mut state = previous.clone();
        let mut changed = Vec::new();
        for name in &targets {
            let next = self.upgrade_version(name, &version).await?;
            if previous.version(name) != Some(&next) {
                changed.push(name.clone());
            }
            state.set_version(name, next);
        }

        if changed.is_empty() && !opts.force {
            info!("{} already at the requested version", targets.join(", "));
            advance(&mut fsm, OperationEvent::NoChange)?;
            notes.push(format!("Already at version {}", version));
            return Ok(OperationReport::from_fsm("upgrade", &fsm, notes));
        }

        let available = self.available_fragments().await?;
        let running = self.executor.running_services().await?;
        let plan = if selective {
            self.compose_plan(&state, &previous.installed, &targets, TargetScope::Selective, &running, &available)?
        } else {
            self.compose_plan(&state, &previous.installed, &targets, TargetScope::Everything, &running, &available)?
        };
        let stop = if selective { targets.clone() } else { plan.app_services() };
        advance(&mut fsm, OperationEvent::Validated)?;
        info!("Upgrading {} to {}", targets.join(", "), version);

        // Backing up
        if opts.skip_backup {
            warn!("Skipping backup; a failed upgrade cannot be rolled back automatically");
            advance(&mut fsm, OperationEvent::BackupSkipped)?;
        } else {
            let request = BackupRequest::new("upgrade")
                .with_state(&previous)
                .with_target(&version);
            if let Some(backup) = self.take_backup(&mut fsm, request).await? {
                let record = RollbackRecord {
                    from_version: self
                        .registry
                        .base()
                        .and_then(|b| previous.version(b))
                        .map(|v| v.backend.clone()),
                    to_version: version.clone(),
                    from_versions: previous.versions.clone(),
                    modules: targets.clone(),
                    backup_path: backup.clone(),
                    created_at: Utc::now(),
                };
                if let Err(e) = self.backups.attach_rollback_record(&backup, &record).await {
                    warn!("{}", e);
                }
            }
        }

        // Mutating and verifying
        let options = OrchestratorOptions::from_state(&state);
        if let Err(cause) = self.upgrade_stage(&mut fsm, &state, &plan, &stop, &options).await {
            return Err(self.recover(&mut fsm, cause, &previous, &plan.app_services()).await);
        }

        // Committed
        notes.push(format!("Upgraded {} to {}", changed.join(", "), version));
        self.after_commit(&options).await;
        Ok(OperationReport::from_fsm("upgrade", &fsm, notes))
    }

    /// Version a module moves to: the release version, or the manifest tag for customer modules
    async fn upgrade_version(
        &mut self,
        name: &str,
        version: &str,
    ) -> Result<ModuleVersion, OrchestratorError> {
        let module = self.registry.require(name)?.clone();
        if module.source != ModuleSource::Customer {
            return Ok(module_version(&module, version));
        }

        let manifest = ModuleManifest::load(&self.layout.module_manifest(name)).await?;
        let refreshed = manifest.to_module();
        let version = module_version(&refreshed, &manifest.image.tag);
        self.registry.register(refreshed)?;
        Ok(version)
    }

    async fn upgrade_stage(
        &self,
        fsm: &mut OperationFsm,
        state: &DeploymentState,
        plan: &ComposePlan,
        stop: &[String],
        options: &OrchestratorOptions,
    ) -> Result<(), OrchestratorError> {
        self.save_state(state).await?;
        self.executor.pull(plan).await?;
        info!("Stopping {}", stop.join(", "));
        self.executor.stop(&plan.narrowed(stop.to_vec())).await?;
        self.apply(plan, false).await?;
        advance(fsm, OperationEvent::Mutated)?;
        self.verify(&plan.services, options).await?;
        advance(fsm, OperationEvent::Verified)
    }
}
