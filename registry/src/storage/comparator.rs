//! Case-insensitive key ordering for the tree engine.
//!
//! Keys are compared by ASCII-folding both sides and then comparing the
//! folded bytes lexicographically. Two keys that compare equal are the same
//! key as far as the tree engine is concerned, so `"London"` and `"london"`
//! address one entry.

use std::cmp::Ordering;

/// Compare two possibly-missing keys.
///
/// A missing key is a caller bug: it is treated as the empty key and a
/// diagnostic is emitted, but the comparison still succeeds.
#[must_use]
pub fn compare(left: Option<&[u8]>, right: Option<&[u8]>) -> Ordering {
    let left = left.unwrap_or_else(|| {
        tracing::warn!("key comparison invoked with a missing left key");
        &[]
    });
    let right = right.unwrap_or_else(|| {
        tracing::warn!("key comparison invoked with a missing right key");
        &[]
    });
    compare_keys(left, right)
}

/// Compare two keys under ASCII case folding.
#[must_use]
pub fn compare_keys(left: &[u8], right: &[u8]) -> Ordering {
    left.iter()
        .map(u8::to_ascii_lowercase)
        .cmp(right.iter().map(u8::to_ascii_lowercase))
}

/// Whether `key` starts with `prefix` under case folding.
#[must_use]
pub fn has_prefix(key: &[u8], prefix: &[u8]) -> bool {
    key.len() >= prefix.len() && key[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// A key ordered by [`compare_keys`].
///
/// The original bytes are kept, so the spelling used by the first writer is
/// what `keys()` reports.
#[derive(Debug, Clone)]
pub struct CaseInsensitiveKey(Vec<u8>);

impl CaseInsensitiveKey {
    #[must_use]
    pub fn new(key: &[u8]) -> Self {
        Self(key.to_vec())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for CaseInsensitiveKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl PartialEq for CaseInsensitiveKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for CaseInsensitiveKey {}

impl PartialOrd for CaseInsensitiveKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CaseInsensitiveKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_keys(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_case_differences_compare_equal() {
        assert_eq!(compare_keys(b"London", b"lONDON"), Ordering::Equal);
        assert_eq!(
            CaseInsensitiveKey::new(b"Key"),
            CaseInsensitiveKey::new(b"kEY")
        );
    }

    #[test]
    fn test_folded_bytewise_order() {
        // '_' (0x5F) sorts between 'Z' (0x5A) and 'a' (0x61) unfolded, but
        // after folding 'Z' becomes 'z' (0x7A) and sorts after '_'.
        assert_eq!(compare_keys(b"Z", b"_"), Ordering::Greater);
        assert_eq!(compare_keys(b"apple", b"Banana"), Ordering::Less);
        assert_eq!(compare_keys(b"abc", b"ABCD"), Ordering::Less);
    }

    #[test]
    fn test_missing_keys_compare_as_empty() {
        assert_eq!(compare(None, Some(&b""[..])), Ordering::Equal);
        assert_eq!(compare(None, Some(&b"a"[..])), Ordering::Less);
        assert_eq!(compare(Some(&b"a"[..]), None), Ordering::Greater);
        assert_eq!(compare(None, None), Ordering::Equal);
    }

    #[test]
    fn test_has_prefix() {
        assert!(has_prefix(b"Weather/London", b"weather/"));
        assert!(has_prefix(b"abc", b""));
        assert!(!has_prefix(b"ab", b"abc"));
        assert!(!has_prefix(b"xbc", b"a"));
    }

    #[test]
    fn test_random_keys_sort_by_folded_form() {
        let mut rng = StdRng::seed_from_u64(7);
        let alphabet = b"aBcDeF_-09zZ";
        let mut keys: Vec<CaseInsensitiveKey> = (0..200)
            .map(|_| {
                let len = rng.random_range(0..8);
                let bytes: Vec<u8> = (0..len)
                    .map(|_| alphabet[rng.random_range(0..alphabet.len())])
                    .collect();
                CaseInsensitiveKey::from(bytes)
            })
            .collect();
        keys.sort();

        for pair in keys.windows(2) {
            let left = pair[0].as_bytes().to_ascii_lowercase();
            let right = pair[1].as_bytes().to_ascii_lowercase();
            assert!(left <= right, "{left:?} should sort before {right:?}");
        }
    }

    #[test]
    fn test_ordering_is_consistent_with_equality() {
        let a = CaseInsensitiveKey::new(b"MiXeD");
        let b = CaseInsensitiveKey::new(b"mixed");
        assert_eq!(a.cmp(&b), Ordering::Equal);
        assert!(a == b);
    }
}
