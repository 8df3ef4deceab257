//! Test that migrating a legacy root converges and a second run changes
//! nothing.

use serde_json::json;

use crate::NamespaceRegistry;

use crate::e2e_tests::helpers::{TestRoot, list_files, write_generation0, write_generation1};

const LEGACY_ENTRIES: &[(&str, &str)] = &[
    ("weather/london", r#"{"temp":15}"#),
    ("Weather/paris", r#"{"temp":18}"#),
    ("Game+Scores/alice", "10"),
    ("game+scores/Bob", "7"),
    ("settings/theme", r#""dark""#),
];

fn snapshot(root: &TestRoot) -> Vec<(String, Vec<(String, serde_json::Value)>)> {
    let registry = root.registry();
    let mut namespaces = Vec::new();
    for name in ["weather", "game/scores", "settings"] {
        let pairs = registry.accessor(name).unwrap().to_pairs().unwrap();
        namespaces.push((name.to_string(), pairs));
    }
    namespaces
}

#[test]
fn test_idempotent_migration() {
    let root = TestRoot::new();
    write_generation0(root.config(), LEGACY_ENTRIES);

    let (registry, report) = NamespaceRegistry::open(root.config().clone()).unwrap();
    assert!(report.migrated_anything());
    drop(registry);
    let files_after_first = list_files(root.path());
    let values_after_first = snapshot(&root);

    let (registry, report) = NamespaceRegistry::open(root.config().clone()).unwrap();
    assert!(!report.migrated_anything());
    drop(registry);
    assert_eq!(list_files(root.path()), files_after_first);
    assert_eq!(snapshot(&root), values_after_first);

    let registry = root.registry();
    assert_eq!(
        registry.accessor("weather").unwrap().get("london").unwrap(),
        json!({"temp": 15})
    );
    assert_eq!(
        registry.accessor("game/scores").unwrap().keys().unwrap(),
        vec!["alice", "Bob"]
    );
}

#[test]
fn test_interrupted_root_resumes() {
    let root = TestRoot::new();
    // A root where the first stage already ran.
    write_generation1(root.config(), LEGACY_ENTRIES);

    let (_registry, report) = NamespaceRegistry::open(root.config().clone()).unwrap();
    assert!(report.hash_to_tree.is_none());
    assert!(report.split.is_some());
    assert!(report.engine_swap.is_some());

    let registry = root.registry();
    assert_eq!(
        registry.accessor("settings").unwrap().get("theme").unwrap(),
        json!("dark")
    );
}
