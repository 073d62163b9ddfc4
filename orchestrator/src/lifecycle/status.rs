//! Installation status

use futures::future::join_all;
use serde::Serialize;
use tracing::warn;

use crate::deploy::health::HealthVerdict;
use crate::errors::OrchestratorError;
use crate::lifecycle::orchestrator::Orchestrator;
use crate::registry::module::{ModuleSource, INFRA_SERVICES};
use crate::storage::state::{DeploymentState, InfraMode};

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frontend_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ModuleSource>,
    pub health: HealthVerdict,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub root: String,
    pub infra_mode: InfraMode,
    pub performance_mode: bool,
    pub modules: Vec<ServiceStatus>,
    /// Empty in external infra mode
    pub infrastructure: Vec<ServiceStatus>,
    pub latest_backup: Option<String>,
}

impl StatusReport {
    /// Every module and infrastructure service reports ready
    pub fn all_healthy(&self) -> bool {
        self.modules
            .iter()
            .chain(self.infrastructure.iter())
            .all(|s| s.health.is_success())
    }
}

impl Orchestrator {
    /// Installed modules with their versions and live health
    pub async fn status(&self) -> Result<StatusReport, OrchestratorError> {
        let state = self.load_installed_state().await?;
        if let Err(e) = self.executor.check_available().await {
            warn!("Container runtime unavailable, health unknown: {}", e);
        }

        let modules = join_all(state.installed.iter().map(|name| self.module_status(&state, name))).await;

        let infrastructure = if state.infra_mode == InfraMode::Full {
            join_all(INFRA_SERVICES.iter().map(|name| async move {
                ServiceStatus {
                    name: name.to_string(),
                    version: None,
                    frontend_version: None,
                    source: None,
                    health: self.probe(name).await,
                }
            }))
            .await
        } else {
            Vec::new()
        };

        let latest_backup = match self.backups.list_backups().await {
            Ok(entries) => entries.first().map(|e| e.id.clone()),
            Err(e) => {
                warn!("Could not list backups: {}", e);
                None
            }
        };

        Ok(StatusReport {
            root: self.layout.base_dir.display().to_string(),
            infra_mode: state.infra_mode,
            performance_mode: state.performance_mode,
            modules,
            infrastructure,
            latest_backup,
        })
    }

    async fn module_status(&self, state: &DeploymentState, name: &str) -> ServiceStatus {
        let version = state.version(name);
        ServiceStatus {
            name: name.to_string(),
            version: version.map(|v| v.backend.clone()),
            frontend_version: version.and_then(|v| v.frontend.clone()),
            source: self.registry.get(name).map(|m| m.source),
            health: self.probe(name).await,
        }
    }

    async fn probe(&self, service: &str) -> HealthVerdict {
        match self.executor.health(service).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("Health probe for {} failed: {}", service, e);
                HealthVerdict::NotFound
            }
        }
    }
}
