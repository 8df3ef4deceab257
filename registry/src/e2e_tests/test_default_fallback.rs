//! Test that missing keys read as the namespace default.

use serde_json::json;

use crate::codec::Value;
use crate::e2e_tests::helpers::TestRoot;

#[test]
fn test_default_fallback() {
    let root = TestRoot::new();
    let registry = root.open_registry();
    let prefs = registry.accessor("prefs").unwrap();

    assert_eq!(prefs.get("color").unwrap(), Value::Null);

    prefs.set_default(json!({"color": "blue"})).unwrap();
    assert_eq!(prefs.get("color").unwrap(), json!({"color": "blue"}));

    prefs.set("color", "red").unwrap();
    assert_eq!(prefs.get("color").unwrap(), json!("red"));

    assert_eq!(prefs.delete("color").unwrap(), json!("red"));
    assert_eq!(prefs.get("color").unwrap(), json!({"color": "blue"}));
    assert_eq!(prefs.delete("color").unwrap(), json!({"color": "blue"}));
}

#[test]
fn test_default_is_copied_per_lookup() {
    let root = TestRoot::new();
    let registry = root.open_registry();
    let prefs = registry.accessor("prefs").unwrap();
    prefs.set_default(json!([])).unwrap();

    let mut first = prefs.get("recent").unwrap();
    if let Value::Array(items) = &mut first {
        items.push(json!("mutated"));
    }
    assert_eq!(prefs.get("recent").unwrap(), json!([]));
}

#[test]
fn test_default_does_not_survive_reopen() {
    let root = TestRoot::new();
    {
        let registry = root.open_registry();
        let prefs = registry.accessor("prefs").unwrap();
        prefs.set_default(7).unwrap();
        prefs.set("size", 12).unwrap();
    }

    let registry = root.open_registry();
    let prefs = registry.accessor("prefs").unwrap();
    assert_eq!(prefs.get("size").unwrap(), json!(12));
    assert_eq!(prefs.get("missing").unwrap(), Value::Null);
}

#[test]
fn test_typed_lookup_uses_default() {
    let root = TestRoot::new();
    let registry = root.open_registry();
    let prefs = registry.accessor("prefs").unwrap();
    prefs.set_default(3).unwrap();

    assert_eq!(prefs.get_as::<u32>("retries").unwrap(), 3);
    prefs.set_as("retries", &5u32).unwrap();
    assert_eq!(prefs.get_as::<u32>("retries").unwrap(), 5);
}
