//! Compose fragment composition
//!
//! Turns a resolved module order into the ordered fragment list and the
//! target service set handed to the executor.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::errors::OrchestratorError;
use crate::registry::manifest::ModuleManifest;
use crate::registry::module::{fragment_name, INFRA_SERVICES};
use crate::registry::ModuleRegistry;
use crate::storage::state::{module_key_prefix, InfraMode};

/// Fragment holding co-located infrastructure services
pub const INFRA_FRAGMENT: &str = "docker-compose.infra.yml";

/// Optional fragment wiring services to off-host infrastructure
pub const EXTERNAL_FRAGMENT: &str = "docker-compose.external.yml";

/// Which services the executor may touch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetScope {
    /// Infrastructure (in `full` mode) plus every included module
    Everything,
    /// Exactly the requested modules plus the base service
    Selective,
}

/// Input to the composer
#[derive(Debug, Clone)]
pub struct ComposeRequest<'a> {
    /// Modules in scope, in dependency order
    pub order: &'a [String],
    pub infra_mode: InfraMode,
    pub performance_mode: bool,
    /// Modules the operation acts on
    pub targets: &'a [String],
    /// Services currently running
    pub running: &'a BTreeSet<String>,
    /// Fragment files present in the compose directory
    pub available: &'a BTreeSet<String>,
    pub scope: TargetScope,
}

/// Typed executor invocation: ordered fragments, target services and flags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposePlan {
    /// Fragment file names, base infrastructure first
    pub fragments: Vec<String>,
    /// Services the invocation targets
    pub services: Vec<String>,
    /// Do not start or recreate services outside `services`
    pub no_deps: bool,
    /// Recreate targeted containers even when their definition is unchanged
    pub force_recreate: bool,
    /// Extra environment for fragment interpolation (image references)
    pub env: BTreeMap<String, String>,
}

impl ComposePlan {
    /// Targeted services that are modules, not infrastructure
    pub fn app_services(&self) -> Vec<String> {
        self.services
            .iter()
            .filter(|s| !INFRA_SERVICES.contains(&s.as_str()))
            .cloned()
            .collect()
    }

    /// Same fragments, narrowed to `services`
    pub fn narrowed(&self, services: Vec<String>) -> ComposePlan {
        ComposePlan {
            services,
            no_deps: true,
            ..self.clone()
        }
    }
}

/// Interpolation variable carrying a module's image reference
pub fn image_ref_var(module: &str) -> String {
    format!("{}_IMAGE_REF", module_key_prefix(module))
}

/// Builds compose plans against the module registry
pub struct ComposeComposer<'a> {
    registry: &'a ModuleRegistry,
}

impl<'a> ComposeComposer<'a> {
    pub fn new(registry: &'a ModuleRegistry) -> Self {
        Self { registry }
    }

    /// Compose the fragment list and service targets for a request
    pub fn compose(&self, request: &ComposeRequest<'_>) -> Result<ComposePlan, OrchestratorError> {
        let mut fragments = Vec::new();

        match request.infra_mode {
            InfraMode::Full => {
                require_fragment(request.available, INFRA_FRAGMENT)?;
                fragments.push(INFRA_FRAGMENT.to_string());
            }
            InfraMode::External => {
                if request.available.contains(EXTERNAL_FRAGMENT) {
                    fragments.push(EXTERNAL_FRAGMENT.to_string());
                }
            }
        }

        let base = self.registry.base();
        let mut included = Vec::new();
        for name in request.order {
            let module = self.registry.require(name)?;
            let is_base = Some(name.as_str()) == base;
            let is_target = request.targets.iter().any(|t| t == name);
            if !(is_base || is_target || request.running.contains(name)) {
                continue;
            }

            let fragment = module.fragment_name();
            require_fragment(request.available, &fragment)?;
            fragments.push(fragment);

            if request.performance_mode {
                let overlay = module.limits_fragment_name();
                if request.available.contains(&overlay) {
                    fragments.push(overlay);
                }
            }
            included.push(name.clone());
        }

        let services = match request.scope {
            TargetScope::Everything => {
                let mut services = Vec::new();
                if request.infra_mode == InfraMode::Full {
                    services.extend(INFRA_SERVICES.iter().map(|s| s.to_string()));
                }
                services.extend(included.iter().cloned());
                services
            }
            TargetScope::Selective => included
                .iter()
                .filter(|name| {
                    Some(name.as_str()) == base || request.targets.iter().any(|t| t == *name)
                })
                .cloned()
                .collect(),
        };

        Ok(ComposePlan {
            fragments,
            services,
            no_deps: request.scope == TargetScope::Selective,
            force_recreate: false,
            env: BTreeMap::new(),
        })
    }
}

fn require_fragment(available: &BTreeSet<String>, name: &str) -> Result<(), OrchestratorError> {
    if available.contains(name) {
        Ok(())
    } else {
        Err(OrchestratorError::Prerequisite(format!(
            "Compose fragment {} is missing",
            name
        )))
    }
}

// ============================ CUSTOMER FRAGMENTS ================================ //

#[derive(Debug, Serialize)]
struct ComposeFragment {
    services: BTreeMap<String, ServiceDefinition>,
}

#[derive(Debug, Serialize)]
struct ServiceDefinition {
    image: String,
    restart: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<String>,
    environment: BTreeMap<String, String>,
    healthcheck: HealthcheckDefinition,
}

#[derive(Debug, Serialize)]
struct HealthcheckDefinition {
    test: Vec<String>,
    interval: String,
    timeout: String,
    retries: u32,
    start_period: String,
}

/// Render the compose fragment for a customer module
pub fn render_module_fragment(
    manifest: &ModuleManifest,
    base: Option<&str>,
) -> Result<String, OrchestratorError> {
    let name = &manifest.identity.name;
    let module = manifest.to_module();

    let mut depends_on: Vec<String> = base.map(|b| vec![b.to_string()]).unwrap_or_default();
    depends_on.extend(manifest.dependencies.modules.iter().cloned());

    let mut environment = BTreeMap::new();
    if let Some(key_var) = &module.api_key_env {
        environment.insert(key_var.clone(), format!("${{{}:-}}", key_var));
    }
    for var in &manifest.environment {
        environment.insert(var.name.clone(), format!("${{{}:-}}", var.name));
    }

    let service = ServiceDefinition {
        image: format!(
            "${{{}:-{}}}",
            image_ref_var(name),
            module.image_ref(&manifest.image.tag)
        ),
        restart: "unless-stopped".to_string(),
        depends_on,
        environment,
        healthcheck: HealthcheckDefinition {
            test: vec![
                "CMD-SHELL".to_string(),
                format!(
                    "curl -fsS http://localhost:{}{} || exit 1",
                    manifest.port, manifest.health_path
                ),
            ],
            interval: "10s".to_string(),
            timeout: "5s".to_string(),
            retries: 6,
            start_period: "30s".to_string(),
        },
    };

    let mut services = BTreeMap::new();
    services.insert(name.clone(), service);
    Ok(serde_yaml::to_string(&ComposeFragment { services })?)
}

/// Fragment file name for a customer module
pub fn customer_fragment_name(manifest: &ModuleManifest) -> String {
    fragment_name(&manifest.identity.name)
}
