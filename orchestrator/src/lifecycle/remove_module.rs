//! Remove a module from an installation

use tracing::{info, warn};

use crate::backup::BackupRequest;
use crate::deploy::compose::TargetScope;
use crate::deploy::fsm::{OperationEvent, OperationFsm};
use crate::errors::OrchestratorError;
use crate::lifecycle::options::OrchestratorOptions;
use crate::lifecycle::orchestrator::{advance, Orchestrator};
use crate::lifecycle::report::OperationReport;

#[derive(Debug, Clone, Default)]
pub struct RemoveModuleOptions {
    pub name: String,
    /// Remove even when installed modules depend on it
    pub force: bool,
    /// Also drop the stored API key
    pub remove_key: bool,
}

impl Orchestrator {
    pub async fn remove_module(&self, opts: &RemoveModuleOptions) -> Result<OperationReport, OrchestratorError> {
        let operation = format!("remove-module {}", opts.name);
        let mut fsm = OperationFsm::new();
        let mut notes = Vec::new();

        // Validating
        self.executor.check_available().await?;
        let previous = self.load_installed_state().await?;
        let module = self.registry.require(&opts.name)?.clone();

        if Some(module.name.as_str()) == self.registry.base() {
            return Err(OrchestratorError::Prerequisite(format!(
                "{} is the base service and cannot be removed",
                module.name
            )));
        }

        if !previous.is_installed(&module.name) {
            warn!("{} is not installed", module.name);
            advance(&mut fsm, OperationEvent::NoChange)?;
            notes.push(format!("{} is not installed", module.name));
            return Ok(OperationReport::from_fsm(&operation, &fsm, notes));
        }

        let dependents = self
            .resolver()
            .dependents_of(&module.name, &previous.installed);
        if !dependents.is_empty() {
            if !opts.force {
                return Err(OrchestratorError::Prerequisite(format!(
                    "{} is required by {}; remove those first or pass --force",
                    module.name,
                    dependents.join(", ")
                )));
            }
            warn!(
                "Removing {} although {} depend on it",
                module.name,
                dependents.join(", ")
            );
            notes.push(format!("{} may stop working without {}", dependents.join(", "), module.name));
        }

        let available = self.available_fragments().await?;
        let running = self.executor.running_services().await?;
        let targets = vec![module.name.clone()];
        let plan = self
            .compose_plan(&previous, &previous.installed, &targets, TargetScope::Selective, &running, &available)?
            .narrowed(targets.clone());
        advance(&mut fsm, OperationEvent::Validated)?;

        // Backing up
        let request = BackupRequest::new(&operation).with_state(&previous);
        self.take_backup(&mut fsm, request).await?;

        let mut state = previous.clone();
        state.uninstall(&module.name);
        if opts.remove_key {
            if let Some(key_var) = &module.api_key_env {
                state.remove(key_var);
                notes.push(format!("Removed {}", key_var));
            }
        }

        // Mutating and verifying: the base service must survive the removal
        let options = OrchestratorOptions::from_state(&state);
        let result = async {
            info!("Stopping and removing {}", module.name);
            self.executor.remove(&plan).await?;
            advance(&mut fsm, OperationEvent::Mutated)?;
            let base: Vec<String> = self.registry.base().map(|b| b.to_string()).into_iter().collect();
            self.verify(&base, &options).await?;
            advance(&mut fsm, OperationEvent::Verified)
        }
        .await;
        if let Err(cause) = result {
            return Err(self.recover(&mut fsm, cause, &previous, &targets).await);
        }

        // Committed
        self.save_state(&state).await?;
        notes.push(format!("{} removed", module.name));
        self.after_commit(&options).await;
        Ok(OperationReport::from_fsm(&operation, &fsm, notes))
    }
}
