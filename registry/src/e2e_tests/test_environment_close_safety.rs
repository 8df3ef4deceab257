//! Test that closing the environment keeps its files whenever work is in
//! flight, and removes them otherwise.

use crate::e2e_tests::helpers::TestRoot;
use crate::storage::{
    CheckpointConfig, CloseOutcome, Engine, EngineKind, Environment, StorageEngine,
};

#[test]
fn test_clean_shutdown_removes_environment_home() {
    let root = TestRoot::new();
    let registry = root.open_registry();
    registry.accessor("weather").unwrap().set("oslo", 3).unwrap();
    assert!(root.config().environment_home().exists());

    let report = registry.shutdown().unwrap();
    assert_eq!(report.accessors_closed, 1);
    assert_eq!(report.environment, Some(CloseOutcome::Removed));
    assert!(!root.config().environment_home().exists());
}

#[test]
fn test_unused_environment_is_never_opened() {
    let root = TestRoot::with_engine(EngineKind::Hash);
    let registry = root.open_registry();
    registry.accessor("weather").unwrap().set("oslo", 3).unwrap();

    let report = registry.shutdown().unwrap();
    assert_eq!(report.environment, None);
    assert!(!root.config().environment_home().exists());
}

#[test]
fn test_active_transaction_preserves_home() {
    let root = TestRoot::new();
    let env = root.environment();
    let txn = env.begin().unwrap();

    assert_eq!(
        env.close().unwrap(),
        CloseOutcome::Preserved {
            active_transactions: 1,
            dirty_files: 0,
            pending_redo_files: 0,
        }
    );
    assert!(root.config().environment_home().exists());
    drop(txn);
}

#[test]
fn test_dirty_table_preserves_home_and_data() {
    let root = TestRoot::new();
    let path = root.config().registry_directory().join("weather.tdb");
    std::fs::create_dir_all(root.config().registry_directory()).unwrap();

    let env = root.environment();
    let mut engine = Engine::create(
        EngineKind::Tree,
        &path,
        Some(&env),
        CheckpointConfig::disabled(),
    )
    .unwrap();
    engine.put(b"oslo", b"3").unwrap();

    assert!(matches!(
        env.close().unwrap(),
        CloseOutcome::Preserved { dirty_files: 1, .. }
    ));
    assert!(root.config().environment_home().exists());
    // The table is abandoned without a final flush.
    std::mem::forget(engine);

    let env = Environment::open_or_create(
        &root.config().environment_home(),
        root.config().environment_options(),
    )
    .unwrap();
    let mut engine = Engine::open(
        EngineKind::Tree,
        &path,
        Some(&env),
        CheckpointConfig::default(),
    )
    .unwrap();
    assert_eq!(engine.get(b"oslo").unwrap(), Some(b"3".to_vec()));
    engine.close().unwrap();
    assert_eq!(env.close().unwrap(), CloseOutcome::Removed);
}
