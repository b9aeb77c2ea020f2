//! Utility functions for the cluster control daemon
//!
//! This module provides common helpers used across the daemon and worker
//! components: task id generation, token hashing, and input validation.

use blake3::Hasher;
use rand::distr::Alphanumeric;
use rand::Rng;

/// Length of generated task identifiers
pub const TASK_ID_LEN: usize = 16;

/// Generate a new task identifier.
///
/// Identifiers are handed out to HTTP callers, so they draw from a
/// cryptographically seeded RNG and carry enough entropy (16 alphanumeric
/// characters, ~95 bits) to be unguessable.
pub fn generate_task_id() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(TASK_ID_LEN)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}

/// Calculate the hex-encoded BLAKE3 digest of an auth token.
///
/// Token tables store digests rather than plaintext tokens, so a leaked
/// tokens.toml does not leak credentials.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Validate a caller-supplied task identifier before it is used in a
/// registry lookup.
///
/// Identifiers must be non-empty, at most 64 characters, and contain only
/// alphanumeric characters.
pub fn validate_task_id(task_id: &str) -> crate::Result<()> {
    if task_id.is_empty() {
        return Err(crate::ControlError::Validation("Task ID cannot be empty".to_string()).into());
    }

    if task_id.len() > 64 {
        return Err(crate::ControlError::Validation(
            "Task ID cannot be longer than 64 characters".to_string(),
        )
        .into());
    }

    if !task_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(crate::ControlError::Validation(
            "Task ID must contain only alphanumeric characters".to_string(),
        )
        .into());
    }

    Ok(())
}
