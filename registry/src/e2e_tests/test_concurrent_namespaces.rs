//! Test that threads can share one registry across namespaces.

use std::sync::Arc;

use serde_json::json;

use crate::e2e_tests::helpers::TestRoot;

const THREADS: usize = 4;
const WRITES: usize = 50;

#[test]
fn test_concurrent_namespaces() {
    let root = TestRoot::new();
    let registry = root.open_registry();

    std::thread::scope(|scope| {
        for t in 0..THREADS {
            let registry = &registry;
            scope.spawn(move || {
                let accessor = registry.accessor(&format!("worker{t}")).unwrap();
                for i in 0..WRITES {
                    accessor.set(&format!("k{i:02}"), json!([t, i])).unwrap();
                }
            });
        }
    });

    for t in 0..THREADS {
        let accessor = registry.accessor(&format!("worker{t}")).unwrap();
        assert_eq!(accessor.length().unwrap(), WRITES);
        assert_eq!(accessor.get("k07").unwrap(), json!([t, 7]));
    }
}

#[test]
fn test_threads_share_one_accessor() {
    let root = TestRoot::new();
    let registry = root.open_registry();

    std::thread::scope(|scope| {
        for t in 0..THREADS {
            let registry = &registry;
            scope.spawn(move || {
                let counters = registry.accessor("Counters").unwrap();
                for i in 0..WRITES {
                    counters.set(&format!("t{t}-{i:02}"), i).unwrap();
                }
            });
        }
    });

    let first = registry.accessor("counters").unwrap();
    let second = registry.accessor("COUNTERS").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.length().unwrap(), THREADS * WRITES);
}
