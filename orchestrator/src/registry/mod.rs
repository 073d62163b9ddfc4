//! Module registry
//!
//! The single authoritative source of module definitions. Built-in modules
//! and customer modules (parsed from manifests under the install root) share
//! one dependency graph, so every operation resolves against the same edges.

pub mod manifest;
pub mod module;

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::errors::OrchestratorError;
use crate::registry::manifest::ModuleManifest;
use crate::registry::module::{Module, ModuleSource, BASE_MODULE};
use crate::storage::layout::InstallLayout;

/// Known modules in declaration order
#[derive(Debug, Clone)]
pub struct ModuleRegistry {
    modules: Vec<Module>,
    base: Option<String>,
}

impl ModuleRegistry {
    /// Build a registry from modules in declaration order and validate it.
    ///
    /// `base` names the service that always resolves first, if any.
    pub fn new(modules: Vec<Module>, base: Option<&str>) -> Result<Self, OrchestratorError> {
        let registry = Self {
            modules,
            base: base.map(|b| b.to_string()),
        };
        registry.validate()?;
        Ok(registry)
    }

    /// The modules shipped with the suite
    pub fn builtin() -> Self {
        let modules = vec![
            Module::builtin(BASE_MODULE, 8000, &[]),
            Module::builtin("items", 8001, &[]),
            Module::builtin("bp", 8002, &["items"]),
            Module::builtin("prospects", 8003, &["bp"]),
            Module::builtin("crm", 8004, &["bp"]),
        ];
        Self {
            modules,
            base: Some(BASE_MODULE.to_string()),
        }
    }

    /// Built-in modules plus every customer manifest stored under the install root
    pub async fn load(layout: &InstallLayout) -> Result<Self, OrchestratorError> {
        let mut registry = Self::builtin();
        let modules_dir = layout.modules_dir();
        if !modules_dir.exists().await {
            return Ok(registry);
        }

        // Customer modules may depend on each other in any directory order
        let mut customer = Vec::new();
        for dir in modules_dir.list_dirs().await? {
            let Some(name) = dir.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            let manifest_file = layout.module_manifest(&name);
            if !manifest_file.exists().await {
                warn!("Module directory without manifest: {}", dir.display());
                continue;
            }
            let manifest = ModuleManifest::load(&manifest_file).await?;
            debug!("Loaded customer module manifest: {}", manifest.identity.name);
            customer.push(manifest.to_module());
        }

        registry.register_all(customer)?;
        Ok(registry)
    }

    /// Add or replace a customer module. The registry is left unchanged on error.
    pub fn register(&mut self, module: Module) -> Result<(), OrchestratorError> {
        self.register_all(vec![module])
    }

    /// Add or replace several customer modules, validating the graph once they are all in.
    /// The registry is left unchanged on error.
    pub fn register_all(&mut self, modules: Vec<Module>) -> Result<(), OrchestratorError> {
        let mut candidate = self.clone();
        for module in modules {
            if let Some(existing) = candidate.get(&module.name) {
                if existing.source == ModuleSource::BuiltIn {
                    return Err(OrchestratorError::Resolution(format!(
                        "Module '{}' is a built-in module and cannot be redefined",
                        module.name
                    )));
                }
            }
            match candidate.modules.iter_mut().find(|m| m.name == module.name) {
                Some(slot) => *slot = module,
                None => candidate.modules.push(module),
            }
        }
        candidate.validate()?;
        *self = candidate;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Look up a module, failing with a resolution error when unknown
    pub fn require(&self, name: &str) -> Result<&Module, OrchestratorError> {
        self.get(name)
            .ok_or_else(|| OrchestratorError::Resolution(format!("Unknown module: {}", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// All modules in declaration order
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Declaration index of a module
    pub fn position(&self, name: &str) -> Option<usize> {
        self.modules.iter().position(|m| m.name == name)
    }

    /// Name of the base service, if this registry has one
    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    /// Check that every dependency names a known module and the graph is acyclic
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        let mut names = HashSet::new();
        for module in &self.modules {
            if !names.insert(module.name.as_str()) {
                return Err(OrchestratorError::Resolution(format!(
                    "Module '{}' is declared twice",
                    module.name
                )));
            }
        }

        if let Some(base) = &self.base {
            if !names.contains(base.as_str()) {
                return Err(OrchestratorError::Resolution(format!(
                    "Base service '{}' is not a registered module",
                    base
                )));
            }
        }

        for module in &self.modules {
            for dep in &module.dependencies {
                if !names.contains(dep.as_str()) {
                    return Err(OrchestratorError::Resolution(format!(
                        "Module '{}' depends on unknown module '{}'",
                        module.name, dep
                    )));
                }
            }
        }

        let mut done = HashSet::new();
        for module in &self.modules {
            let mut visiting = Vec::new();
            self.check_acyclic(&module.name, &mut visiting, &mut done)?;
        }
        Ok(())
    }

    fn check_acyclic<'a>(
        &'a self,
        name: &'a str,
        visiting: &mut Vec<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> Result<(), OrchestratorError> {
        if done.contains(name) {
            return Ok(());
        }
        if visiting.contains(&name) {
            visiting.push(name);
            return Err(OrchestratorError::Resolution(format!(
                "Module '{}' depends on itself transitively ({})",
                name,
                visiting.join(" -> ")
            )));
        }
        visiting.push(name);
        if let Some(module) = self.get(name) {
            for dep in &module.dependencies {
                self.check_acyclic(dep, visiting, done)?;
            }
        }
        visiting.pop();
        done.insert(name);
        Ok(())
    }
}
