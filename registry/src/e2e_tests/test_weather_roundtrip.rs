//! Test that a structured value survives closing and reopening the registry.

use serde_json::json;

use crate::e2e_tests::helpers::TestRoot;
use crate::storage::{CloseOutcome, EngineKind};

#[test]
fn test_weather_roundtrip() {
    for engine in [EngineKind::Tree, EngineKind::Hash] {
        let root = TestRoot::with_engine(engine);
        let reading = json!({"temp": 15, "unit": "C"});

        {
            let registry = root.open_registry();
            let weather = registry.accessor("weather").unwrap();
            weather.set("london", reading.clone()).unwrap();
            weather.close().unwrap();

            let report = registry.shutdown().unwrap();
            if engine == EngineKind::Tree {
                assert_eq!(report.environment, Some(CloseOutcome::Removed));
            }
        }

        let registry = root.open_registry();
        let weather = registry.accessor("weather").unwrap();
        assert_eq!(weather.get("london").unwrap(), reading);
        assert_eq!(weather.keys().unwrap(), vec!["london"]);
    }
}

#[test]
fn test_roundtrip_without_explicit_close() {
    let root = TestRoot::new();
    {
        let registry = root.open_registry();
        let weather = registry.accessor("weather").unwrap();
        weather.set("paris", json!([18, "C"])).unwrap();
        // Dropping the registry shuts it down.
    }

    let registry = root.open_registry();
    assert_eq!(
        registry.accessor("weather").unwrap().get("paris").unwrap(),
        json!([18, "C"])
    );
}
