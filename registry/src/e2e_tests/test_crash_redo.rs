//! Test that committed writes survive a crash before the namespace file is
//! checkpointed.

use serde_json::json;

use crate::e2e_tests::helpers::TestRoot;
use crate::storage::CheckpointConfig;

#[test]
fn test_crash_redo() {
    let mut root = TestRoot::new();
    root.config_mut().checkpoint = CheckpointConfig::disabled();

    {
        let registry = root.open_registry();
        let weather = registry.accessor("weather").unwrap();
        weather.set("london", json!({"temp": 15})).unwrap();
        weather.set("berlin", json!({"temp": 11})).unwrap();
        weather.delete("london").unwrap();
        weather.set("rome", json!({"temp": 24})).unwrap();
        // Simulate a crash: nothing is flushed or closed.
        std::mem::forget(registry);
    }
    assert!(root.config().environment_home().exists());

    let registry = root.open_registry();
    let weather = registry.accessor("weather").unwrap();
    assert_eq!(weather.keys().unwrap(), vec!["berlin", "rome"]);
    assert_eq!(weather.get("rome").unwrap(), json!({"temp": 24}));
    assert!(!weather.has_key("london").unwrap());

    assert_eq!(registry.stats().unwrap().pending_redo_files, 0);
}

#[test]
fn test_redo_reaches_every_namespace() {
    let mut root = TestRoot::new();
    root.config_mut().checkpoint = CheckpointConfig::disabled();

    {
        let registry = root.open_registry();
        for name in ["alpha", "beta", "gamma/delta"] {
            registry.accessor(name).unwrap().set("owner", name).unwrap();
        }
        std::mem::forget(registry);
    }

    let registry = root.open_registry();
    registry.environment().unwrap();
    assert_eq!(registry.stats().unwrap().pending_redo_files, 3);

    for name in ["alpha", "beta", "gamma/delta"] {
        assert_eq!(
            registry.accessor(name).unwrap().get("owner").unwrap(),
            json!(name)
        );
    }
    assert_eq!(registry.stats().unwrap().pending_redo_files, 0);
}
