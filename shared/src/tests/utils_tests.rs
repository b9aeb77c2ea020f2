//! Tests for shared utility functions

use std::collections::HashSet;

use crate::utils::{generate_task_id, hash_token, validate_task_id, TASK_ID_LEN};

#[test]
fn test_generated_ids_have_expected_shape() {
    let id = generate_task_id();
    assert_eq!(TASK_ID_LEN, id.len());
    assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
}

#[test]
fn test_generated_ids_do_not_repeat() {
    let ids: HashSet<String> = (0..1000).map(|_| generate_task_id()).collect();
    assert_eq!(1000, ids.len());
}

#[test]
fn test_generated_ids_pass_validation() {
    for _ in 0..100 {
        validate_task_id(&generate_task_id()).unwrap();
    }
}

#[test]
fn test_validate_rejects_empty_id() {
    assert!(validate_task_id("").is_err());
}

#[test]
fn test_validate_rejects_oversized_id() {
    assert!(validate_task_id(&"a".repeat(65)).is_err());
}

#[test]
fn test_validate_rejects_non_alphanumeric_id() {
    assert!(validate_task_id("../etc/passwd").is_err());
    assert!(validate_task_id("id with spaces").is_err());
}

#[test]
fn test_hash_token_is_stable_hex() {
    let digest = hash_token("secret");
    assert_eq!(64, digest.len());
    assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(digest, hash_token("secret"));
    assert_ne!(digest, hash_token("Secret"));
}
