//! Tests for daemon configuration parsing and validation

use crate::config::{DaemonConfig, TokensConfig};

const MINIMAL_CONFIG: &str = r#"
listen_address = "127.0.0.1:2224"
"#;

#[test]
fn test_minimal_config_gets_defaults() {
    let config = DaemonConfig::from_toml_str(MINIMAL_CONFIG).unwrap();
    assert_eq!("127.0.0.1:2224", config.listen_address);
    assert_eq!(128, config.max_concurrent_tasks);
    assert_eq!(4, config.worker_count);
    assert_eq!(100, config.scheduler_tick_interval_ms);
    assert_eq!(60, config.task_unresponsive_timeout_seconds);
    assert_eq!(3600, config.task_abandoned_timeout_seconds);
    assert_eq!(0, config.default_request_timeout_seconds);
    assert_eq!(1024, config.channel_buffer_size);
    assert!(config.auth_tokens_file.is_none());
    assert!(config.worker_exec_path.is_none());
}

#[test]
fn test_explicit_values_override_defaults() {
    let config = DaemonConfig::from_toml_str(
        r#"
listen_address = "0.0.0.0:8080"
worker_count = 8
max_concurrent_tasks = 16
default_request_timeout_seconds = 300
"#,
    )
    .unwrap();
    assert_eq!(8, config.worker_count);
    assert_eq!(16, config.max_concurrent_tasks);
    assert_eq!(
        Some(std::time::Duration::from_secs(300)),
        config.default_request_timeout()
    );
}

#[test]
fn test_zero_request_timeout_means_no_default() {
    let config = DaemonConfig::from_toml_str(MINIMAL_CONFIG).unwrap();
    assert_eq!(None, config.default_request_timeout());
}

#[test]
fn test_rejects_zero_worker_count() {
    let result = DaemonConfig::from_toml_str(
        r#"
listen_address = "127.0.0.1:2224"
worker_count = 0
"#,
    );
    let message = result.unwrap_err().to_string();
    assert!(message.contains("worker_count"));
}

#[test]
fn test_rejects_empty_listen_address() {
    let result = DaemonConfig::from_toml_str(r#"listen_address = """#);
    assert!(result.is_err());
}

#[test]
fn test_collects_multiple_validation_issues() {
    let result = DaemonConfig::from_toml_str(
        r#"
listen_address = ""
worker_count = 0
"#,
    );
    let message = result.unwrap_err().to_string();
    assert!(message.contains("listen_address"));
    assert!(message.contains("worker_count"));
}

#[test]
fn test_rejects_buffer_smaller_than_task_bound() {
    let result = DaemonConfig::from_toml_str(
        r#"
listen_address = "127.0.0.1:2224"
max_concurrent_tasks = 500
channel_buffer_size = 100
"#,
    );
    let message = result.unwrap_err().to_string();
    assert!(message.contains("channel_buffer_size"));
}

#[test]
fn test_malformed_toml_is_a_config_error() {
    let result = DaemonConfig::from_toml_str("listen_address = [not toml");
    let message = result.unwrap_err().to_string();
    assert!(message.contains("Failed to parse"));
}

#[test]
fn test_tokens_config_parses_entries() {
    let config = TokensConfig::from_toml_str(&format!(
        r#"
[[tokens]]
username = "alice"
groups = ["haclient"]
token_hash = "{}"

[[tokens]]
username = "root"
superuser = true
token_hash = "{}"
"#,
        crate::utils::hash_token("secret-a"),
        crate::utils::hash_token("secret-b"),
    ))
    .unwrap();

    assert_eq!(2, config.tokens.len());
    assert_eq!("alice", config.tokens[0].username);
    assert!(!config.tokens[0].superuser);
    assert!(config.tokens[1].superuser);
}

#[test]
fn test_tokens_config_rejects_bad_hash() {
    let result = TokensConfig::from_toml_str(
        r#"
[[tokens]]
username = "alice"
token_hash = "not-a-digest"
"#,
    );
    let message = result.unwrap_err().to_string();
    assert!(message.contains("token_hash"));
}

#[test]
fn test_empty_tokens_file_is_valid() {
    let config = TokensConfig::from_toml_str("").unwrap();
    assert!(config.tokens.is_empty());
}
