// crates/expunge-core/tests/canonical_hashing.rs
// ============================================================================
// Module: Canonical Hashing Tests
// Description: Verifies canonical JSON hashing determinism and limits.
// ============================================================================
//! ## Overview
//! Ensures canonical JSON hashing is deterministic across key ordering,
//! stable across repeated runs, sensitive to content changes, and respects
//! size limits.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::collections::BTreeMap;

use proptest::prelude::*;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use expunge_core::hashing::HashAlgorithm;
use expunge_core::hashing::HashError;
use expunge_core::hashing::canonical_json_bytes;
use expunge_core::hashing::hash_canonical_json;
use expunge_core::hashing::hash_canonical_json_with_limit;

#[test]
fn hash_is_order_independent_for_maps() {
    let mut map_a = Map::new();
    map_a.insert("b".to_string(), json!(2));
    map_a.insert("a".to_string(), json!(1));
    let mut map_b = Map::new();
    map_b.insert("a".to_string(), json!(1));
    map_b.insert("b".to_string(), json!(2));

    let hash_a = hash_canonical_json(HashAlgorithm::Sha256, &Value::Object(map_a)).unwrap();
    let hash_b = hash_canonical_json(HashAlgorithm::Sha256, &Value::Object(map_b)).unwrap();
    assert_eq!(hash_a, hash_b);
}

#[test]
fn hash_changes_with_content() {
    let hash_a = hash_canonical_json(HashAlgorithm::Sha256, &json!({"v": 1})).unwrap();
    let hash_b = hash_canonical_json(HashAlgorithm::Sha256, &json!({"v": 2})).unwrap();
    assert_ne!(hash_a, hash_b);
}

#[test]
fn size_limit_boundaries_are_exact() {
    let payload = BTreeMap::from([("d", "x".to_string())]);
    let exact = canonical_json_bytes(&payload).unwrap().len();
    assert!(hash_canonical_json_with_limit(HashAlgorithm::Sha256, &payload, exact).is_ok());
    let under = hash_canonical_json_with_limit(HashAlgorithm::Sha256, &payload, exact - 1);
    assert!(matches!(under, Err(HashError::SizeLimitExceeded { .. })));
}

#[test]
fn digest_is_lowercase_hex() {
    let digest = hash_canonical_json(HashAlgorithm::Sha256, &json!([1, 2, 3])).unwrap();
    assert_eq!(digest.value.len(), 64);
    assert!(digest.value.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

proptest! {
    #[test]
    fn hash_ignores_insertion_order(entries in proptest::collection::btree_map(
        "[a-z]{1,8}",
        proptest::option::of(0i64..1_000),
        1..8,
    )) {
        let forward: Map<String, Value> =
            entries.iter().map(|(key, value)| (key.clone(), json!(value))).collect();
        let reverse: Map<String, Value> =
            entries.iter().rev().map(|(key, value)| (key.clone(), json!(value))).collect();
        let hash_a =
            hash_canonical_json(HashAlgorithm::Sha256, &Value::Object(forward)).unwrap();
        let hash_b =
            hash_canonical_json(HashAlgorithm::Sha256, &Value::Object(reverse)).unwrap();
        prop_assert_eq!(hash_a, hash_b);
    }
}
