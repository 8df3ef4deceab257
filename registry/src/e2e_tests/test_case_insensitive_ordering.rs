//! Test that tree namespaces order and match keys without regard to ASCII
//! case.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use crate::e2e_tests::helpers::TestRoot;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

fn random_key(rng: &mut StdRng) -> String {
    let len = rng.random_range(1..=8);
    (0..len)
        .map(|_| char::from(ALPHABET[rng.random_range(0..ALPHABET.len())]))
        .collect()
}

#[test]
fn test_case_insensitive_ordering() {
    let root = TestRoot::new();
    let registry = root.open_registry();
    let words = registry.accessor("words").unwrap();

    let mut rng = StdRng::seed_from_u64(0x5eed);
    // Folded key -> (first spelling, last value written).
    let mut expected: BTreeMap<String, (String, u64)> = BTreeMap::new();
    for i in 0..500u64 {
        let key = random_key(&mut rng);
        words.set(&key, i).unwrap();
        expected
            .entry(key.to_ascii_lowercase())
            .and_modify(|entry| entry.1 = i)
            .or_insert((key, i));
    }

    let spellings: Vec<String> = expected.values().map(|(key, _)| key.clone()).collect();
    assert_eq!(words.keys().unwrap(), spellings);
    assert_eq!(words.length().unwrap(), expected.len());

    for (folded, (_, value)) in &expected {
        assert_eq!(words.get(&folded.to_ascii_uppercase()).unwrap(), json!(value));
        assert!(words.has_key(folded).unwrap());
    }
}

#[test]
fn test_first_spelling_is_kept() {
    let root = TestRoot::new();
    let registry = root.open_registry();
    let words = registry.accessor("words").unwrap();

    words.set("MixedCase", 1).unwrap();
    words.set("mixedcase", 2).unwrap();
    words.set("MIXEDCASE", 3).unwrap();

    assert_eq!(words.keys().unwrap(), vec!["MixedCase"]);
    assert_eq!(words.get("mixedCASE").unwrap(), json!(3));
    assert_eq!(words.delete("MIXEDcase").unwrap(), json!(3));
    assert!(words.is_empty().unwrap());
}

#[test]
fn test_ordering_survives_reopen() {
    let root = TestRoot::new();
    {
        let registry = root.open_registry();
        let words = registry.accessor("words").unwrap();
        for key in ["delta", "Charlie", "bravo", "ALPHA"] {
            words.set(key, key.len()).unwrap();
        }
    }

    let registry = root.open_registry();
    let words = registry.accessor("words").unwrap();
    assert_eq!(
        words.keys().unwrap(),
        vec!["ALPHA", "bravo", "Charlie", "delta"]
    );
    assert_eq!(
        words.to_mapping().unwrap().keys().collect::<Vec<_>>(),
        vec!["ALPHA", "Charlie", "bravo", "delta"]
    );
}
