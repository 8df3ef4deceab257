//! Test that maintenance deletes redundant log segments without losing data.

use serde_json::json;

use crate::codec::Value;
use crate::e2e_tests::helpers::TestRoot;
use crate::storage::environment::MIN_LOG_SEGMENT_SIZE;
use crate::storage::wal::SEGMENT_PREFIX;

fn segments(root: &TestRoot) -> usize {
    std::fs::read_dir(root.config().environment_home())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(SEGMENT_PREFIX))
        .count()
}

#[test]
fn test_log_archival() {
    let mut root = TestRoot::new();
    root.config_mut().log_segment_size = Some(MIN_LOG_SEGMENT_SIZE);
    let payload = Value::String("w".repeat(2048));

    {
        let registry = root.open_registry();
        let bulk = registry.accessor("bulk").unwrap();
        for i in 0..150 {
            bulk.set(&format!("entry{i:03}"), payload.clone()).unwrap();
        }
        let before = segments(&root);
        assert!(before > 1);

        let report = registry.maintain().unwrap();
        assert!(report.checkpoint_lsn.is_some());
        assert!(!report.archived.is_empty());
        assert!(report.archived.iter().all(|path| !path.exists()));
        assert_eq!(segments(&root), before - report.archived.len());

        let stats = registry.stats().unwrap();
        assert_eq!(stats.archived_segments, report.archived.len() as u64);
        assert_eq!(stats.log_segment_size, MIN_LOG_SEGMENT_SIZE);
    }

    let registry = root.open_registry();
    let bulk = registry.accessor("bulk").unwrap();
    assert_eq!(bulk.length().unwrap(), 150);
    assert_eq!(bulk.get("entry149").unwrap(), payload);
    assert_eq!(bulk.get("entry150").unwrap(), json!(null));
}
