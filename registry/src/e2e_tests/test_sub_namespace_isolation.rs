//! Test that sub-namespaces have independent storage.

use serde_json::json;

use crate::codec::Value;
use crate::e2e_tests::helpers::TestRoot;

#[test]
fn test_sub_namespace_isolation() {
    let root = TestRoot::new();
    let registry = root.open_registry();
    let game = registry.accessor("game").unwrap();

    let a = game.sub_namespace("a").unwrap();
    let b = game.sub_namespace("b").unwrap();
    a.set("k", 1).unwrap();

    assert_eq!(a.get("k").unwrap(), json!(1));
    assert_eq!(b.get("k").unwrap(), Value::Null);
    assert!(!game.has_key("k").unwrap());
    assert_ne!(a.path(), b.path());
    assert!(a.path().starts_with(root.config().registry_directory().join("game")));
}

#[test]
fn test_sub_namespace_is_shared_with_direct_lookup() {
    let root = TestRoot::new();
    let registry = root.open_registry();
    let child = registry.accessor("game").unwrap().sub_namespace("Scores").unwrap();
    child.set("alice", 10).unwrap();

    let direct = registry.accessor("game/scores").unwrap();
    assert_eq!(direct.get("alice").unwrap(), json!(10));
}

#[test]
fn test_parent_writes_do_not_touch_children() {
    let root = TestRoot::new();
    let registry = root.open_registry();
    let parent = registry.accessor("docs").unwrap();
    let child = parent.sub_namespace("rust").unwrap();

    child.set("vec", "growable array").unwrap();
    parent.set("vec", "parent entry").unwrap();
    parent.clear().unwrap();

    assert!(parent.is_empty().unwrap());
    assert_eq!(child.get("vec").unwrap(), json!("growable array"));
}
