//! Dependency resolution using DFS-based topological sort

use std::collections::HashSet;

use crate::errors::OrchestratorError;
use crate::registry::ModuleRegistry;

/// Expands requested modules into a complete, dependency-ordered list
pub struct DependencyResolver<'a> {
    registry: &'a ModuleRegistry,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(registry: &'a ModuleRegistry) -> Self {
        Self { registry }
    }

    /// Resolve requested modules.
    ///
    /// The result contains every requested module and its transitive
    /// dependencies exactly once, each after all of its dependencies, with the
    /// base service first. Independent modules keep registry declaration
    /// order, so the output does not depend on the order of `requested`.
    pub fn resolve<S: AsRef<str>>(&self, requested: &[S]) -> Result<Vec<String>, OrchestratorError> {
        let mut roots: Vec<&str> = Vec::new();
        for name in requested {
            let name = name.as_ref();
            self.registry.require(name)?;
            if !roots.contains(&name) {
                roots.push(name);
            }
        }
        roots.sort_by_key(|name| self.registry.position(name));

        let mut resolved = Vec::new();
        let mut seen = HashSet::new();

        if let Some(base) = self.registry.base() {
            let mut visiting = Vec::new();
            self.visit(base, &mut resolved, &mut seen, &mut visiting)?;
        }

        for root in roots {
            let mut visiting = Vec::new();
            self.visit(root, &mut resolved, &mut seen, &mut visiting)?;
        }

        Ok(resolved)
    }

    fn visit(
        &self,
        name: &str,
        resolved: &mut Vec<String>,
        seen: &mut HashSet<String>,
        visiting: &mut Vec<String>,
    ) -> Result<(), OrchestratorError> {
        if visiting.iter().any(|v| v == name) {
            visiting.push(name.to_string());
            return Err(OrchestratorError::Resolution(format!(
                "Module '{}' depends on itself transitively ({})",
                name,
                visiting.join(" -> ")
            )));
        }

        if seen.contains(name) {
            return Ok(());
        }

        let module = self.registry.require(name)?;
        visiting.push(name.to_string());
        for dep in &module.dependencies {
            self.visit(dep, resolved, seen, visiting)?;
        }
        visiting.pop();

        seen.insert(name.to_string());
        resolved.push(name.to_string());
        Ok(())
    }

    /// Installed modules that directly or transitively depend on `name`
    pub fn dependents_of<S: AsRef<str>>(&self, name: &str, installed: &[S]) -> Vec<String> {
        let mut dependents = Vec::new();
        for candidate in installed {
            let candidate = candidate.as_ref();
            if candidate == name {
                continue;
            }
            if self.depends_on(candidate, name, &mut HashSet::new()) {
                dependents.push(candidate.to_string());
            }
        }
        dependents
    }

    fn depends_on(&self, module: &str, target: &str, seen: &mut HashSet<String>) -> bool {
        if !seen.insert(module.to_string()) {
            return false;
        }
        let Some(def) = self.registry.get(module) else {
            return false;
        };
        def.dependencies
            .iter()
            .any(|dep| dep == target || self.depends_on(dep, target, seen))
    }

    /// Dependencies of `name` (transitive) that are not in `installed`, in install order
    pub fn missing_dependencies<S: AsRef<str>>(
        &self,
        name: &str,
        installed: &[S],
    ) -> Result<Vec<String>, OrchestratorError> {
        let full = self.resolve(&[name])?;
        Ok(full
            .into_iter()
            .filter(|m| m != name && !installed.iter().any(|i| i.as_ref() == m))
            .collect())
    }
}
