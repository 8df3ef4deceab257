//! Test the accessor contract over hash namespace files.

use serde_json::json;

use crate::accessor::KeyFilter;
use crate::codec::Value;
use crate::e2e_tests::helpers::{TestRoot, write_generation1};
use crate::storage::EngineKind;

#[test]
fn test_hash_engine_roundtrip() {
    let root = TestRoot::with_engine(EngineKind::Hash);
    {
        let registry = root.open_registry();
        let cache = registry.accessor("cache").unwrap();
        assert_eq!(cache.kind(), EngineKind::Hash);
        assert_eq!(
            cache.path().extension().and_then(|e| e.to_str()),
            Some(EngineKind::Hash.extension())
        );

        cache.set("alpha", 1).unwrap();
        cache.set("Beta", json!({"nested": [1, 2]})).unwrap();
        cache.set("gamma", "three").unwrap();
        assert_eq!(cache.delete("gamma").unwrap(), json!("three"));
    }

    let registry = root.open_registry();
    let cache = registry.accessor("cache").unwrap();
    assert_eq!(cache.length().unwrap(), 2);
    assert_eq!(cache.get("alpha").unwrap(), json!(1));
    assert_eq!(cache.get("beta").unwrap(), Value::Null);
    assert_eq!(cache.get("Beta").unwrap(), json!({"nested": [1, 2]}));

    let mut keys = cache.keys().unwrap();
    keys.sort();
    assert_eq!(keys, vec!["Beta", "alpha"]);
}

#[test]
fn test_hash_prefix_is_exact() {
    let root = TestRoot::with_engine(EngineKind::Hash);
    let registry = root.open_registry();
    let cache = registry.accessor("cache").unwrap();
    cache.set("user:1", 1).unwrap();
    cache.set("User:2", 2).unwrap();
    cache.set("group:1", 3).unwrap();

    let mut matched = Vec::new();
    cache
        .each_key(Some(&KeyFilter::prefix("user:")), |key| {
            matched.push(key.to_string());
        })
        .unwrap();
    assert_eq!(matched, vec!["user:1"]);
}

#[test]
fn test_hash_queries() {
    let root = TestRoot::with_engine(EngineKind::Hash);
    let registry = root.open_registry();
    let cache = registry.accessor("cache").unwrap();
    cache.set("a", "x").unwrap();
    cache.set("b", "y").unwrap();

    assert!(cache.has_key("a").unwrap());
    assert!(cache.has_value(&json!("y")).unwrap());
    assert!(cache.has_pair("b", &json!("y")).unwrap());
    assert!(!cache.has_pair("b", &json!("x")).unwrap());
    assert_eq!(cache.index_of(&json!("x")).unwrap(), Some("a".to_string()));

    cache.clear().unwrap();
    assert!(cache.is_empty().unwrap());
}

#[test]
fn test_migrated_legacy_data_is_visible_to_hash_accessors() {
    let root = TestRoot::with_engine(EngineKind::Hash);
    write_generation1(root.config(), &[("weather/london", "15")]);

    let registry = root.open_registry();
    let weather = registry.accessor("weather").unwrap();
    assert_eq!(weather.kind(), EngineKind::Hash);
    assert_eq!(weather.get("london").unwrap(), json!(15));
}
