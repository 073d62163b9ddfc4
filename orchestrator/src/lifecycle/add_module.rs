//! Add a module to an existing installation

use std::path::PathBuf;

use tracing::{info, warn};

use crate::backup::BackupRequest;
use crate::deploy::compose::{customer_fragment_name, render_module_fragment, TargetScope};
use crate::deploy::fsm::{OperationEvent, OperationFsm};
use crate::deploy::health::HealthVerdict;
use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::lifecycle::options::OrchestratorOptions;
use crate::lifecycle::orchestrator::{advance, module_version, Orchestrator};
use crate::lifecycle::report::OperationReport;
use crate::registry::manifest::ModuleManifest;
use crate::storage::state::DeploymentState;

#[derive(Debug, Clone, Default)]
pub struct AddModuleOptions {
    pub name: String,
    pub api_key: Option<String>,
    pub version: Option<String>,
    /// Recreate the container without changing its version
    pub restart: bool,
    pub force: bool,
    /// Customer module manifest to register first
    pub manifest: Option<PathBuf>,
}

/// A customer manifest together with its original text
struct ManifestSource {
    manifest: ModuleManifest,
    contents: String,
}

impl Orchestrator {
    /// Install one module (and any missing dependencies) on a running installation
    pub async fn add_module(&mut self, opts: &AddModuleOptions) -> Result<OperationReport, OrchestratorError> {
        let operation = format!("add-module {}", opts.name);
        let mut fsm = OperationFsm::new();
        let mut notes = Vec::new();

        // Validating
        self.executor.check_available().await?;
        let previous = self.load_installed_state().await?;

        let source = match &opts.manifest {
            Some(path) => Some(self.register_manifest(&opts.name, path).await?),
            None => None,
        };

        let module = self.registry.require(&opts.name)?.clone();
        if Some(module.name.as_str()) == self.registry.base() {
            return Err(OrchestratorError::Prerequisite(format!(
                "{} is the base service; it is managed by install and upgrade",
                module.name
            )));
        }

        let installed = previous.is_installed(&module.name);
        let requested = opts
            .version
            .clone()
            .or_else(|| source.as_ref().map(|src| src.manifest.image.tag.clone()));
        let current = previous.version(&module.name).map(|v| v.backend.clone());
        let version_matches = match (&requested, &current) {
            (Some(requested), Some(current)) => requested == current,
            (Some(_), None) => false,
            (None, _) => true,
        };
        if installed && !version_matches {
            info!(
                "{} is installed at {}; moving it to {}",
                module.name,
                current.as_deref().unwrap_or("unknown"),
                requested.as_deref().unwrap_or("unknown")
            );
        }
        if installed && version_matches && !opts.force && !opts.restart {
            let verdict = match self.executor.health(&module.name).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    warn!("Could not read health of {}: {}", module.name, e);
                    HealthVerdict::NotFound
                }
            };
            if verdict.is_success() {
                info!("{} is already installed and {}", module.name, verdict);
                advance(&mut fsm, OperationEvent::NoChange)?;
                notes.push(format!("{} is already installed and healthy", module.name));
                return Ok(OperationReport::from_fsm(&operation, &fsm, notes));
            }
            warn!("{} is installed but {}; reinstalling", module.name, verdict);
        }

        let missing = self
            .resolver()
            .missing_dependencies(&module.name, &previous.installed)?;
        if !missing.is_empty() {
            info!("Also installing missing dependencies: {}", missing.join(", "));
        }
        let mut to_start = missing.clone();
        to_start.push(module.name.clone());

        let suite_version = match previous.version(self.registry.base().unwrap_or_default()) {
            Some(version) => version.backend.clone(),
            None => self.target_version(opts.version.as_deref()).await?,
        };
        let keep_version = opts.restart && installed && previous.version(&module.name).is_some();

        let mut state = previous.clone();
        for name in &missing {
            let dep = self.registry.require(name)?;
            state.set_version(name, module_version(dep, &suite_version));
        }
        if !keep_version {
            let version = match (&opts.version, &source) {
                (Some(v), _) => v.clone(),
                (None, Some(src)) => src.manifest.image.tag.clone(),
                (None, None) => suite_version.clone(),
            };
            state.set_version(&module.name, module_version(&module, &version));
        }
        let mut scope = previous.installed.clone();
        scope.extend(to_start.iter().cloned());
        state.installed = self.resolver().resolve(&scope)?;

        let mut available = self.available_fragments().await?;
        if let Some(src) = &source {
            available.insert(customer_fragment_name(&src.manifest));
        }
        self.compose_plan(&state, &state.installed, &to_start, TargetScope::Selective, &Default::default(), &available)?;
        advance(&mut fsm, OperationEvent::Validated)?;

        // Backing up
        let request = BackupRequest::new(&operation).with_state(&previous);
        self.take_backup(&mut fsm, request).await?;

        // Files this operation is about to create for a customer module
        let created_files = match &source {
            Some(src) => self.new_customer_files(&src.manifest).await,
            None => Vec::new(),
        };

        // Mutating and verifying
        let result = self
            .add_module_stage(&mut fsm, &mut state, opts, &to_start, source.as_ref(), &mut notes)
            .await;
        if let Err(cause) = result {
            let err = self.recover(&mut fsm, cause, &previous, &to_start).await;
            self.remove_customer_files(&created_files).await;
            return Err(err);
        }

        // Committed
        self.save_state(&state).await?;
        notes.push(format!(
            "{} installed at version {}",
            module.name,
            state
                .version(&module.name)
                .map(|v| v.backend.as_str())
                .unwrap_or("unknown")
        ));
        self.after_commit(&OrchestratorOptions::from_state(&state)).await;
        Ok(OperationReport::from_fsm(&operation, &fsm, notes))
    }

    /// Parse a customer manifest and add it to the registry
    async fn register_manifest(&mut self, name: &str, path: &std::path::Path) -> Result<ManifestSource, OrchestratorError> {
        let contents = File::new(path).read_string().await?;
        let manifest = ModuleManifest::parse(&contents)
            .map_err(|e| OrchestratorError::Manifest(format!("{}: {}", path.display(), e)))?;
        if manifest.identity.name != name {
            return Err(OrchestratorError::Manifest(format!(
                "Manifest {} describes module '{}', not '{}'",
                path.display(),
                manifest.identity.name,
                name
            )));
        }
        self.registry.register(manifest.to_module())?;
        info!("Registered customer module {} (manifest {})", name, manifest.version());
        Ok(ManifestSource { manifest, contents })
    }

    /// Manifest directory and fragment of a customer module that do not exist yet
    async fn new_customer_files(&self, manifest: &ModuleManifest) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        let module_dir = self.layout.modules_dir().subdir(&manifest.identity.name);
        if !module_dir.exists().await {
            paths.push(module_dir.path().to_path_buf());
        }
        let fragment = self.layout.compose_dir().file(&customer_fragment_name(manifest));
        if !fragment.exists().await {
            paths.push(fragment.path().to_path_buf());
        }
        paths
    }

    /// Delete files left behind by a failed customer module install
    async fn remove_customer_files(&self, paths: &[PathBuf]) {
        for path in paths {
            let removed = if path.is_dir() {
                Dir::new(path).delete().await
            } else {
                File::new(path).delete().await
            };
            match removed {
                Ok(()) => info!("Removed {}", path.display()),
                Err(e) => warn!("Could not remove {}: {}", path.display(), e),
            }
        }
    }

    async fn add_module_stage(
        &self,
        fsm: &mut OperationFsm,
        state: &mut DeploymentState,
        opts: &AddModuleOptions,
        to_start: &[String],
        source: Option<&ManifestSource>,
        notes: &mut Vec<String>,
    ) -> Result<(), OrchestratorError> {
        let options = OrchestratorOptions::from_state(state);

        if let Some(src) = source {
            let name = &src.manifest.identity.name;
            self.layout
                .module_manifest(name)
                .write_atomic(src.contents.as_bytes())
                .await?;
            let fragment = render_module_fragment(&src.manifest, self.registry.base())?;
            self.layout
                .compose_dir()
                .file(&customer_fragment_name(&src.manifest))
                .write_atomic(fragment.as_bytes())
                .await?;

            for var in &src.manifest.environment {
                if state.get(&var.name).is_some() {
                    continue;
                }
                state.set(var.name.clone(), var.placeholder.clone());
                warn!(
                    "{} requires {} ({}); seeded with a placeholder, set the real value in {}",
                    name,
                    var.name,
                    var.description,
                    self.layout.config_file().path().display()
                );
                notes.push(format!("Set {} before relying on {}", var.name, name));
            }
        }

        for name in to_start {
            let module = self.registry.require(name)?.clone();
            let explicit = if *name == opts.name {
                opts.api_key.as_deref()
            } else {
                None
            };
            let outcome = self.credentials.get_or_provision(state, &module, explicit).await?;
            notes.push(format!("{}: API key {}", name, outcome));
        }
        self.save_state(state).await?;

        let available = self.available_fragments().await?;
        let running = self.executor.running_services().await?;
        let mut plan = self.compose_plan(
            state,
            &state.installed,
            to_start,
            TargetScope::Selective,
            &running,
            &available,
        )?;
        plan.force_recreate = opts.restart || opts.force;

        self.apply(&plan, !opts.restart).await?;
        advance(fsm, OperationEvent::Mutated)?;
        self.verify(&plan.services, &options).await?;
        advance(fsm, OperationEvent::Verified)
    }
}
