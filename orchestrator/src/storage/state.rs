//! Durable deployment state stored in the flat configuration file

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::filesys::file::File;
use crate::storage::env_file::EnvFile;

pub const KEY_INFRA_MODE: &str = "INFRA_MODE";
pub const KEY_INSTALLED_MODULES: &str = "INSTALLED_MODULES";
pub const KEY_DEPLOYMENT_SECRET: &str = "DEPLOYMENT_SECRET";
pub const KEY_ENCRYPTION_KEY: &str = "ENCRYPTION_KEY";
pub const KEY_PERFORMANCE_MODE: &str = "PERFORMANCE_MODE";

/// Where shared stateful services run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InfraMode {
    /// Database, cache and broker run as containers on this host
    #[default]
    Full,
    /// Infrastructure is provided off-host
    External,
}

impl fmt::Display for InfraMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfraMode::Full => write!(f, "full"),
            InfraMode::External => write!(f, "external"),
        }
    }
}

impl FromStr for InfraMode {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full" => Ok(InfraMode::Full),
            "external" => Ok(InfraMode::External),
            other => Err(OrchestratorError::ConfigError(format!(
                "Invalid {}: {}",
                KEY_INFRA_MODE, other
            ))),
        }
    }
}

/// Installed version of one module. Backend and frontend version independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleVersion {
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frontend: Option<String>,
}

impl ModuleVersion {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            frontend: None,
        }
    }

    /// Same version for backend and frontend artifacts
    pub fn paired(version: impl Into<String>) -> Self {
        let version = version.into();
        Self {
            backend: version.clone(),
            frontend: Some(version),
        }
    }
}

/// Configuration key prefix for a module (`crm` -> `CRM`, `acme-reports` -> `ACME_REPORTS`)
pub fn module_key_prefix(module: &str) -> String {
    module
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

/// What is currently installed, loaded once per operation
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentState {
    pub infra_mode: InfraMode,

    /// Installed modules in dependency order
    pub installed: Vec<String>,

    pub versions: BTreeMap<String, ModuleVersion>,

    pub performance_mode: bool,

    /// Full configuration map, including keys this type does not model
    env: EnvFile,
}

impl DeploymentState {
    /// Empty state for a fresh install
    pub fn new(infra_mode: InfraMode) -> Self {
        Self {
            infra_mode,
            installed: Vec::new(),
            versions: BTreeMap::new(),
            performance_mode: false,
            env: EnvFile::new(),
        }
    }

    /// Build typed state from a parsed configuration map
    pub fn from_env(env: EnvFile) -> Result<Self, OrchestratorError> {
        let infra_mode = match env.get_non_empty(KEY_INFRA_MODE) {
            Some(mode) => mode.parse()?,
            None => InfraMode::default(),
        };

        let installed: Vec<String> = env
            .get(KEY_INSTALLED_MODULES)
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();

        let mut versions = BTreeMap::new();
        for module in &installed {
            let prefix = module_key_prefix(module);
            if let Some(backend) = env.get_non_empty(&format!("{}_VERSION", prefix)) {
                let frontend = env
                    .get_non_empty(&format!("{}_FRONTEND_VERSION", prefix))
                    .map(|s| s.to_string());
                versions.insert(
                    module.clone(),
                    ModuleVersion {
                        backend: backend.to_string(),
                        frontend,
                    },
                );
            }
        }

        let performance_mode = env
            .get(KEY_PERFORMANCE_MODE)
            .map(parse_bool)
            .unwrap_or(false);

        Ok(Self {
            infra_mode,
            installed,
            versions,
            performance_mode,
            env,
        })
    }

    /// Load from the configuration file
    pub async fn load(file: &File) -> Result<Self, OrchestratorError> {
        let env = EnvFile::load(file).await?;
        Self::from_env(env)
    }

    /// Persist atomically to the configuration file
    pub async fn save(&self, file: &File) -> Result<(), OrchestratorError> {
        self.to_env().save(file).await
    }

    /// Render typed fields back over the preserved configuration map
    pub fn to_env(&self) -> EnvFile {
        let mut env = self.env.clone();
        env.set(KEY_INFRA_MODE, self.infra_mode.to_string());
        env.set(KEY_INSTALLED_MODULES, self.installed.join(","));
        env.set(KEY_PERFORMANCE_MODE, self.performance_mode.to_string());
        for (module, version) in &self.versions {
            let prefix = module_key_prefix(module);
            env.set(format!("{}_VERSION", prefix), version.backend.clone());
            match &version.frontend {
                Some(frontend) => env.set(format!("{}_FRONTEND_VERSION", prefix), frontend.clone()),
                None => {
                    env.remove(&format!("{}_FRONTEND_VERSION", prefix));
                }
            }
        }
        env
    }

    /// Raw configuration value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.env.get_non_empty(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.set(key, value);
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.env.remove(key)
    }

    pub fn is_installed(&self, module: &str) -> bool {
        self.installed.iter().any(|m| m == module)
    }

    pub fn version(&self, module: &str) -> Option<&ModuleVersion> {
        self.versions.get(module)
    }

    pub fn set_version(&mut self, module: &str, version: ModuleVersion) {
        self.versions.insert(module.to_string(), version);
    }

    /// Drop a module from the installed set together with its version keys
    pub fn uninstall(&mut self, module: &str) {
        self.installed.retain(|m| m != module);
        self.versions.remove(module);
        let prefix = module_key_prefix(module);
        self.env.remove(&format!("{}_VERSION", prefix));
        self.env.remove(&format!("{}_FRONTEND_VERSION", prefix));
    }

    pub fn deployment_secret(&self) -> Option<&str> {
        self.get(KEY_DEPLOYMENT_SECRET)
    }

    pub fn encryption_key(&self) -> Option<&str> {
        self.get(KEY_ENCRYPTION_KEY)
    }

    pub fn api_key(&self, env_var: &str) -> Option<&str> {
        self.get(env_var)
    }

    /// Image override for a module (`<MODULE>_IMAGE`)
    pub fn image_override(&self, module: &str) -> Option<&str> {
        self.get(&format!("{}_IMAGE", module_key_prefix(module)))
    }

    /// Integer tuning key, falling back to `default` when absent or invalid
    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
