//! Customer module manifests
//!
//! A manifest is a YAML document whose `version` field selects the
//! architecture: `"1.0"` is a single container serving both API and UI,
//! `"1.1"` is an API container plus a statically served UI bundle.

use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::filesys::file::File;
use crate::registry::module::{is_infra_service, Module, ModuleSource};
use crate::storage::state::module_key_prefix;

/// Module identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleIdentity {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Image coordinates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCoordinates {
    pub repository: String,
    pub tag: String,
}

/// Declared dependencies: other modules and external services
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDependencies {
    #[serde(default)]
    pub modules: Vec<String>,
    #[serde(default)]
    pub services: Vec<String>,
}

/// Reverse proxy routing prefixes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routing {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_prefix: Option<String>,
}

/// UI bundle served statically next to a separated module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendBundle {
    /// Release asset name of the bundle
    pub bundle: String,
    /// URL path the bundle is served under
    pub mount: String,
}

/// Environment variable the module requires at runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredEnvVar {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub placeholder: String,
    #[serde(default)]
    pub sensitive: bool,
}

/// Architecture variant, selected by the manifest `version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Architecture {
    /// `"1.0"`: one container serves API and UI
    Unified,
    /// `"1.1"`: API container plus a statically served UI bundle
    Separated { frontend: FrontendBundle },
}

/// Wire shape of the manifest before the version discriminator is applied
#[derive(Debug, Clone, Deserialize)]
struct RawManifest {
    version: String,
    module: ModuleIdentity,
    image: ImageCoordinates,
    port: u16,
    #[serde(default = "default_health_path")]
    health_path: String,
    #[serde(default)]
    dependencies: ManifestDependencies,
    #[serde(default)]
    routing: Routing,
    #[serde(default)]
    frontend: Option<FrontendBundle>,
    #[serde(default)]
    environment: Vec<RequiredEnvVar>,
    #[serde(default)]
    database_schema: Option<String>,
}

fn default_health_path() -> String {
    "/health".to_string()
}

/// Parsed and validated customer module manifest
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawManifest")]
pub struct ModuleManifest {
    pub architecture: Architecture,
    pub identity: ModuleIdentity,
    pub image: ImageCoordinates,
    pub port: u16,
    pub health_path: String,
    pub dependencies: ManifestDependencies,
    pub routing: Routing,
    pub environment: Vec<RequiredEnvVar>,
    pub database_schema: Option<String>,
}

impl TryFrom<RawManifest> for ModuleManifest {
    type Error = OrchestratorError;

    fn try_from(raw: RawManifest) -> Result<Self, Self::Error> {
        let architecture = match (raw.version.as_str(), raw.frontend) {
            ("1.0", None) => Architecture::Unified,
            ("1.0", Some(_)) => {
                return Err(OrchestratorError::Manifest(
                    "version 1.0 modules serve their own UI; remove the frontend section".to_string(),
                ))
            }
            ("1.1", Some(frontend)) => Architecture::Separated { frontend },
            ("1.1", None) => {
                return Err(OrchestratorError::Manifest(
                    "version 1.1 modules require a frontend section".to_string(),
                ))
            }
            (other, _) => {
                return Err(OrchestratorError::Manifest(format!(
                    "Unsupported manifest version: {}",
                    other
                )))
            }
        };

        let manifest = ModuleManifest {
            architecture,
            identity: raw.module,
            image: raw.image,
            port: raw.port,
            health_path: raw.health_path,
            dependencies: raw.dependencies,
            routing: raw.routing,
            environment: raw.environment,
            database_schema: raw.database_schema,
        };
        manifest.validate()?;
        Ok(manifest)
    }
}

impl ModuleManifest {
    /// Parse a manifest document
    pub fn parse(contents: &str) -> Result<Self, OrchestratorError> {
        serde_yaml::from_str(contents).map_err(|e| OrchestratorError::Manifest(e.to_string()))
    }

    /// Load and parse a manifest file
    pub async fn load(file: &File) -> Result<Self, OrchestratorError> {
        let contents = file.read_string().await?;
        Self::parse(&contents).map_err(|e| {
            OrchestratorError::Manifest(format!("{}: {}", file.path().display(), e))
        })
    }

    fn validate(&self) -> Result<(), OrchestratorError> {
        let name = &self.identity.name;
        let valid_name = name
            .chars()
            .next()
            .map(|c| c.is_ascii_lowercase())
            .unwrap_or(false)
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !valid_name {
            return Err(OrchestratorError::Manifest(format!(
                "Invalid module name '{}': use lowercase letters, digits and dashes",
                name
            )));
        }

        if self.port == 0 {
            return Err(OrchestratorError::Manifest(format!(
                "Module '{}' must declare a non-zero port",
                name
            )));
        }

        if self.image.repository.is_empty() || self.image.tag.is_empty() {
            return Err(OrchestratorError::Manifest(format!(
                "Module '{}' must declare image repository and tag",
                name
            )));
        }

        if self.dependencies.modules.iter().any(|d| d == name) {
            return Err(OrchestratorError::Manifest(format!(
                "Module '{}' cannot depend on itself",
                name
            )));
        }

        for service in &self.dependencies.services {
            if !is_infra_service(service) {
                return Err(OrchestratorError::Manifest(format!(
                    "Module '{}' depends on unknown service '{}'",
                    name, service
                )));
            }
        }

        let prefixes = [
            self.routing.api_prefix.as_deref(),
            self.routing.ui_prefix.as_deref(),
        ];
        if let Some(bad) = prefixes.into_iter().flatten().find(|p| !p.starts_with('/')) {
            return Err(OrchestratorError::Manifest(format!(
                "Routing prefix '{}' must start with '/'",
                bad
            )));
        }

        Ok(())
    }

    /// Registry entry for this module
    pub fn to_module(&self) -> Module {
        let name = self.identity.name.clone();
        Module {
            image: self.image.repository.clone(),
            port: self.port,
            health_path: self.health_path.clone(),
            dependencies: self.dependencies.modules.clone(),
            has_frontend: matches!(self.architecture, Architecture::Separated { .. }),
            schema: self
                .database_schema
                .clone()
                .unwrap_or_else(|| name.replace('-', "_")),
            api_key_env: Some(format!("{}_API_KEY", module_key_prefix(&name))),
            source: ModuleSource::Customer,
            name,
        }
    }

    /// Manifest version string
    pub fn version(&self) -> &'static str {
        match self.architecture {
            Architecture::Unified => "1.0",
            Architecture::Separated { .. } => "1.1",
        }
    }
}
