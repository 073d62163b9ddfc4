//! Dependency resolver tests

use suitectl::deploy::resolver::DependencyResolver;
use suitectl::errors::OrchestratorError;
use suitectl::registry::module::Module;
use suitectl::registry::ModuleRegistry;

/// `{items: [], bp: [items], prospects: [bp]}` without a base service
fn sample_registry() -> ModuleRegistry {
    ModuleRegistry::new(
        vec![
            Module::builtin("items", 8001, &[]),
            Module::builtin("bp", 8002, &["items"]),
            Module::builtin("prospects", 8003, &["bp"]),
        ],
        None,
    )
    .unwrap()
}

#[test]
fn test_transitive_chain() {
    let registry = sample_registry();
    let resolver = DependencyResolver::new(&registry);
    assert_eq!(
        resolver.resolve(&["prospects"]).unwrap(),
        vec!["items", "bp", "prospects"]
    );
}

#[test]
fn test_request_order_does_not_matter() {
    let registry = sample_registry();
    let resolver = DependencyResolver::new(&registry);
    assert_eq!(resolver.resolve(&["bp", "items"]).unwrap(), vec!["items", "bp"]);
    assert_eq!(resolver.resolve(&["items", "bp"]).unwrap(), vec!["items", "bp"]);
}

#[test]
fn test_resolution_is_deterministic() {
    let registry = ModuleRegistry::builtin();
    let resolver = DependencyResolver::new(&registry);
    let first = resolver.resolve(&["crm", "prospects", "items"]).unwrap();
    for _ in 0..10 {
        assert_eq!(resolver.resolve(&["items", "crm", "prospects"]).unwrap(), first);
    }
}

#[test]
fn test_base_service_first_without_duplicates() {
    let registry = ModuleRegistry::builtin();
    let resolver = DependencyResolver::new(&registry);
    let order = resolver.resolve(&["crm", "prospects", "crm"]).unwrap();

    assert_eq!(order.first().map(String::as_str), Some("core"));
    let mut unique = order.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), order.len());

    // Every module comes after each of its dependencies
    for (index, name) in order.iter().enumerate() {
        for dep in &registry.require(name).unwrap().dependencies {
            let dep_index = order.iter().position(|m| m == dep).unwrap();
            assert!(dep_index < index, "{} placed before its dependency {}", name, dep);
        }
    }
}

#[test]
fn test_empty_request_yields_base_only() {
    let registry = ModuleRegistry::builtin();
    let resolver = DependencyResolver::new(&registry);
    let none: [&str; 0] = [];
    assert_eq!(resolver.resolve(&none).unwrap(), vec!["core"]);
}

#[test]
fn test_unknown_module() {
    let registry = sample_registry();
    let resolver = DependencyResolver::new(&registry);
    let err = resolver.resolve(&["billing"]).unwrap_err();
    assert!(matches!(err, OrchestratorError::Resolution(_)));
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn test_unknown_dependency() {
    let err = ModuleRegistry::new(vec![Module::builtin("bp", 8002, &["items"])], None).unwrap_err();
    assert!(matches!(err, OrchestratorError::Resolution(_)));
}

#[test]
fn test_cycle() {
    let err = ModuleRegistry::new(
        vec![
            Module::builtin("items", 8001, &["prospects"]),
            Module::builtin("bp", 8002, &["items"]),
            Module::builtin("prospects", 8003, &["bp"]),
        ],
        None,
    )
    .unwrap_err();
    assert!(matches!(err, OrchestratorError::Resolution(_)));
}

#[test]
fn test_dependents_and_missing() {
    let registry = ModuleRegistry::builtin();
    let resolver = DependencyResolver::new(&registry);

    let installed = ["core", "items", "bp", "prospects"];
    assert_eq!(resolver.dependents_of("bp", &installed), vec!["prospects"]);
    assert_eq!(resolver.dependents_of("items", &installed), vec!["bp", "prospects"]);

    assert!(resolver.missing_dependencies("crm", &installed).unwrap().is_empty());
    assert_eq!(
        resolver.missing_dependencies("prospects", &["core"]).unwrap(),
        vec!["items", "bp"]
    );
}
