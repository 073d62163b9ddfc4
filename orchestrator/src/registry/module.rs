//! Module definitions

use serde::{Deserialize, Serialize};

use crate::storage::state::module_key_prefix;

/// Name of the base service every module runs on top of
pub const BASE_MODULE: &str = "core";

/// Infrastructure services co-located in `full` infra mode
pub const INFRA_SERVICES: [&str; 3] = ["postgres", "redis", "rabbitmq"];

/// Where a module definition came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleSource {
    /// Shipped with the suite
    BuiltIn,
    /// Parsed from a customer-supplied manifest
    Customer,
}

/// An independently versioned, independently deployable service unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Unique module name, also the compose service name
    pub name: String,

    /// Image repository without tag
    pub image: String,

    pub port: u16,

    pub health_path: String,

    /// Names of modules this one depends on, in declaration order
    pub dependencies: Vec<String>,

    /// Whether the UI ships as a separately versioned artifact
    pub has_frontend: bool,

    /// Database schema owned by the module
    pub schema: String,

    /// Configuration key holding the module's API key, if it needs one
    pub api_key_env: Option<String>,

    pub source: ModuleSource,
}

impl Module {
    /// A built-in module with the conventional health path and key variable
    pub fn builtin(name: &str, port: u16, dependencies: &[&str]) -> Self {
        let api_key_env = if name == BASE_MODULE {
            None
        } else {
            Some(format!("{}_API_KEY", module_key_prefix(name)))
        };
        Self {
            name: name.to_string(),
            image: format!("ghcr.io/suite/{}", name),
            port,
            health_path: "/health".to_string(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            has_frontend: true,
            schema: name.replace('-', "_"),
            api_key_env,
            source: ModuleSource::BuiltIn,
        }
    }

    /// Full image reference for a version tag
    pub fn image_ref(&self, version: &str) -> String {
        format!("{}:{}", self.image, version)
    }

    pub fn is_base(&self) -> bool {
        self.name == BASE_MODULE
    }

    /// Compose fragment holding the module's service definition
    pub fn fragment_name(&self) -> String {
        fragment_name(&self.name)
    }

    /// Optional resource-limit overlay applied in performance mode
    pub fn limits_fragment_name(&self) -> String {
        format!("docker-compose.{}.limits.yml", self.name)
    }
}

/// Compose fragment file name for a module or infra group
pub fn fragment_name(name: &str) -> String {
    format!("docker-compose.{}.yml", name)
}

/// Whether `service` is an infrastructure service rather than a module
pub fn is_infra_service(service: &str) -> bool {
    INFRA_SERVICES.contains(&service)
}
