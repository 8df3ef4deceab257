//! Test the recovery policy for stored bytes that fail to decode.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;

use crate::e2e_tests::helpers::{TestRoot, get_raw, put_raw};

const GARBAGE: &[u8] = b"\xff{not json";

#[test]
fn test_corrupt_value_falls_back_to_default() {
    let root = TestRoot::new();
    let registry = root.open_registry();
    let accessor = registry.accessor("settings").unwrap();
    accessor.set("volume", 7).unwrap();
    put_raw(&registry, &accessor, "theme", GARBAGE);

    accessor.set_default("fallback").unwrap();
    assert_eq!(accessor.get("theme").unwrap(), json!("fallback"));
    assert_eq!(accessor.get("volume").unwrap(), json!(7));
}

#[test]
fn test_recovery_callback_gets_raw_bytes() {
    let root = TestRoot::new();
    let registry = root.open_registry();
    let accessor = registry.accessor("settings").unwrap();
    put_raw(&registry, &accessor, "theme", GARBAGE);

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    accessor
        .set_recovery(move |bytes| {
            seen.fetch_add(1, Ordering::SeqCst);
            assert_eq!(bytes, GARBAGE);
            Some(json!("recovered"))
        })
        .unwrap();

    assert_eq!(accessor.get("theme").unwrap(), json!("recovered"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_iteration_continues_past_corrupt_entries() {
    let root = TestRoot::new();
    let registry = root.open_registry();
    let accessor = registry.accessor("settings").unwrap();
    accessor.set("a", 1).unwrap();
    accessor.set("c", 3).unwrap();
    put_raw(&registry, &accessor, "b", GARBAGE);
    accessor.set_default(0).unwrap();

    let pairs = accessor.to_pairs().unwrap();
    assert_eq!(
        pairs,
        vec![
            ("a".to_string(), json!(1)),
            ("b".to_string(), json!(0)),
            ("c".to_string(), json!(3)),
        ]
    );
}

#[test]
fn test_corrupt_bytes_are_left_in_place() {
    let root = TestRoot::new();
    let registry = root.open_registry();
    let accessor = registry.accessor("settings").unwrap();
    put_raw(&registry, &accessor, "theme", GARBAGE);
    accessor.set_recovery(|_| Some(json!("recovered"))).unwrap();

    assert_eq!(accessor.get("theme").unwrap(), json!("recovered"));
    assert_eq!(
        get_raw(&registry, &accessor, "theme"),
        Some(GARBAGE.to_vec())
    );
}
