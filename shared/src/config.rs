//! Configuration types and validation for the cluster control daemon
//!
//! This module defines the configuration structures loaded from
//! `daemon.toml` and the auth token table from `tokens.toml`, including
//! validation logic and serialization support.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults::*;

/// Main daemon configuration loaded from daemon.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    /// Address and port the HTTP API listens on, e.g. "127.0.0.1:2224"
    pub listen_address: String,
    /// Path to the auth token table; resolved relative to daemon.toml
    /// when not absolute. Defaults to "tokens.toml".
    #[serde(default)]
    pub auth_tokens_file: Option<String>,
    /// Path to the worker executable. Defaults to a binary named "worker"
    /// next to the daemon binary.
    #[serde(default)]
    pub worker_exec_path: Option<String>,
    /// Upper bound on live task records; task creation fails beyond it
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Number of worker processes in the pool
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Period of the scheduler loop in milliseconds
    #[serde(default = "default_scheduler_tick_interval_ms")]
    pub scheduler_tick_interval_ms: u64,
    /// Window after which an executing task with no recent message is
    /// considered defunct and its worker is killed
    #[serde(default = "default_task_unresponsive_timeout")]
    pub task_unresponsive_timeout_seconds: u64,
    /// Window after which a finished task whose result was never collected
    /// is garbage-collected
    #[serde(default = "default_task_abandoned_timeout")]
    pub task_abandoned_timeout_seconds: u64,
    /// Overall timeout applied when the caller omits one; 0 disables the
    /// default so long-running cluster commands are not cut short
    #[serde(default)]
    pub default_request_timeout_seconds: u64,
    /// Capacity of both message bus queues
    #[serde(default = "default_channel_buffer_size")]
    pub channel_buffer_size: usize,
    /// Wait time for in-flight tasks during shutdown in seconds
    #[serde(default = "default_graceful_shutdown_timeout")]
    pub graceful_shutdown_timeout_seconds: u64,
}

impl DaemonConfig {
    /// Parse a daemon.toml document and validate it.
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let config: DaemonConfig = toml::from_str(content)
            .map_err(|e| crate::ControlError::Config(format!("Failed to parse daemon.toml: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field values, collecting every problem found so the
    /// operator sees all of them at once.
    pub fn validate(&self) -> crate::Result<()> {
        let mut issues = Vec::new();

        if self.listen_address.trim().is_empty() {
            issues.push("listen_address must not be empty".to_string());
        }
        if self.max_concurrent_tasks == 0 {
            issues.push("max_concurrent_tasks must be greater than 0".to_string());
        }
        if self.worker_count == 0 {
            issues.push("worker_count must be greater than 0".to_string());
        }
        if self.scheduler_tick_interval_ms == 0 {
            issues.push("scheduler_tick_interval_ms must be greater than 0".to_string());
        }
        if self.channel_buffer_size == 0 {
            issues.push("channel_buffer_size must be greater than 0".to_string());
        }
        if self.channel_buffer_size < self.max_concurrent_tasks {
            issues.push(format!(
                "channel_buffer_size ({}) must be at least max_concurrent_tasks ({}) \
                 so the scheduler can always queue a dispatch for every live task",
                self.channel_buffer_size, self.max_concurrent_tasks
            ));
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(crate::ControlError::Config(issues.join("; ")).into())
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler_tick_interval_ms)
    }

    pub fn unresponsive_window(&self) -> Duration {
        Duration::from_secs(self.task_unresponsive_timeout_seconds)
    }

    pub fn abandoned_window(&self) -> Duration {
        Duration::from_secs(self.task_abandoned_timeout_seconds)
    }

    /// The daemon-wide default overall timeout, if one is configured.
    pub fn default_request_timeout(&self) -> Option<Duration> {
        if self.default_request_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.default_request_timeout_seconds))
        }
    }
}

/// Auth token table loaded from tokens.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TokensConfig {
    /// Array of accepted tokens and the principals they resolve to
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

/// One accepted token and the principal it resolves to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenEntry {
    pub username: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub superuser: bool,
    /// Hex-encoded blake3 digest of the plaintext token
    pub token_hash: String,
}

impl TokensConfig {
    /// Parse a tokens.toml document and validate it.
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let config: TokensConfig = toml::from_str(content)
            .map_err(|e| crate::ControlError::Config(format!("Failed to parse tokens.toml: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        let mut issues = Vec::new();

        for entry in &self.tokens {
            if entry.username.trim().is_empty() {
                issues.push("token entry with empty username".to_string());
            }
            if entry.token_hash.len() != 64
                || !entry.token_hash.chars().all(|c| c.is_ascii_hexdigit())
            {
                issues.push(format!(
                    "token_hash for '{}' is not a 64-character hex digest",
                    entry.username
                ));
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(crate::ControlError::Config(issues.join("; ")).into())
        }
    }
}
