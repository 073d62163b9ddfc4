//! Fresh installation

use std::collections::BTreeSet;

use tracing::info;

use crate::backup::BackupRequest;
use crate::credentials::passwords::{generate_deployment_secret, generate_encryption_key};
use crate::credentials::InfraSecrets;
use crate::deploy::compose::TargetScope;
use crate::deploy::fsm::{OperationEvent, OperationFsm};
use crate::errors::OrchestratorError;
use crate::lifecycle::options::OrchestratorOptions;
use crate::lifecycle::orchestrator::{advance, module_version, Orchestrator};
use crate::lifecycle::report::OperationReport;
use crate::storage::state::{DeploymentState, InfraMode, KEY_DEPLOYMENT_SECRET, KEY_ENCRYPTION_KEY};

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    pub version: Option<String>,
    pub infra_mode: InfraMode,
    /// Modules to install on top of the base service
    pub modules: Vec<String>,
    /// Reinstall over an existing installation
    pub force: bool,
}

impl Orchestrator {
    /// Install infrastructure, the base service and the requested modules.
    ///
    /// Runs in two stages: infrastructure and the base service first, then
    /// API keys are provisioned and the modules started.
    pub async fn install(&self, opts: &InstallOptions) -> Result<OperationReport, OrchestratorError> {
        let mut fsm = OperationFsm::new();
        let mut notes = Vec::new();

        // Validating
        self.executor.check_available().await?;
        let existing = self.installation_present().await;
        if existing && !opts.force {
            return Err(OrchestratorError::Prerequisite(format!(
                "An installation already exists at {}; pass --force to reinstall",
                self.layout.base_dir.display()
            )));
        }

        let order = self.resolver().resolve(&opts.modules)?;
        let version = self.target_version(opts.version.as_deref()).await?;
        let available = self.available_fragments().await?;

        let config = self.layout.config_file();
        let previous = if config.exists().await {
            DeploymentState::load(&config).await?
        } else {
            DeploymentState::new(opts.infra_mode)
        };

        let mut state = previous.clone();
        state.infra_mode = opts.infra_mode;
        state.installed.clear();
        if state.deployment_secret().is_none() {
            state.set(KEY_DEPLOYMENT_SECRET, generate_deployment_secret());
        }
        if state.encryption_key().is_none() {
            state.set(KEY_ENCRYPTION_KEY, generate_encryption_key());
        }
        for name in &order {
            let module = self.registry.require(name)?;
            state.set_version(name, module_version(module, &version));
        }

        let base: Vec<String> = self.registry.base().map(|b| b.to_string()).into_iter().collect();
        let modules: Vec<String> = order.iter().filter(|m| !base.contains(*m)).cloned().collect();

        // Fail on missing fragments before anything is touched
        let none = BTreeSet::new();
        self.compose_plan(&state, &base, &base, TargetScope::Everything, &none, &available)?;
        self.compose_plan(&state, &order, &modules, TargetScope::Selective, &none, &available)?;
        advance(&mut fsm, OperationEvent::Validated)?;
        info!("Installing {} at version {} ({} infrastructure)", order.join(", "), version, state.infra_mode);

        // Backing up
        if existing {
            let request = BackupRequest::new("install --force")
                .with_state(&previous)
                .with_target(&version);
            self.take_backup(&mut fsm, request).await?;
        } else {
            advance(&mut fsm, OperationEvent::BackupSkipped)?;
        }

        // A fresh install has nothing to go back to except its prepared configuration
        let fallback = if existing { previous.clone() } else { state.clone() };

        let options = OrchestratorOptions::from_state(&state);
        if let Err(cause) = self
            .install_stages(&mut fsm, &mut state, &order, &base, &modules, &available, &mut notes)
            .await
        {
            return Err(self.recover(&mut fsm, cause, &fallback, &order).await);
        }

        // Committed
        state.installed = order.clone();
        self.save_state(&state).await?;
        notes.push(format!("Installed {} at version {}", order.join(", "), version));
        self.after_commit(&options).await;

        Ok(OperationReport::from_fsm("install", &fsm, notes))
    }

    #[allow(clippy::too_many_arguments)]
    async fn install_stages(
        &self,
        fsm: &mut OperationFsm,
        state: &mut DeploymentState,
        order: &[String],
        base: &[String],
        modules: &[String],
        available: &BTreeSet<String>,
        notes: &mut Vec<String>,
    ) -> Result<(), OrchestratorError> {
        let options = OrchestratorOptions::from_state(state);
        self.layout.setup().await?;
        if state.infra_mode == InfraMode::Full {
            InfraSecrets::load_or_generate(&self.layout.secrets_file()).await?;
        }
        self.save_state(state).await?;

        // Stage 1: infrastructure and the base service
        let stage1 = self.compose_plan(state, base, base, TargetScope::Everything, &BTreeSet::new(), available)?;
        self.apply(&stage1, true).await?;
        advance(fsm, OperationEvent::Mutated)?;
        self.verify(&stage1.services, &options).await?;

        if modules.is_empty() {
            return advance(fsm, OperationEvent::Verified);
        }
        advance(fsm, OperationEvent::NextStage)?;

        // Stage 2: keys, then modules
        for name in modules {
            let module = self.registry.require(name)?.clone();
            let outcome = self.credentials.get_or_provision(state, &module, None).await?;
            notes.push(format!("{}: API key {}", name, outcome));
        }
        self.save_state(state).await?;

        let running = self.executor.running_services().await?;
        let stage2 = self.compose_plan(state, order, modules, TargetScope::Selective, &running, available)?;
        self.apply(&stage2, true).await?;
        advance(fsm, OperationEvent::Mutated)?;
        self.verify(&stage2.services, &options).await?;
        advance(fsm, OperationEvent::Verified)
    }
}
