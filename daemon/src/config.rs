//! Configuration management for the cluster control daemon
//!
//! This module handles loading and validation of the daemon configuration
//! from a `daemon.toml` file and the auth token table from its companion
//! `tokens.toml`.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use shared::config::{DaemonConfig, TokensConfig};

/// The expected name of the configuration file.
const DAEMON_CONFIG_FILE: &str = "daemon.toml";

/// Token table file name used when the configuration does not name one.
const DEFAULT_TOKENS_FILE: &str = "tokens.toml";

/// Manages the daemon's configuration.
/// This struct is responsible for loading and validating both
/// configuration files and for applying command-line overrides.
#[derive(Debug)]
pub struct ConfigManager {
    /// The full path to the configuration file.
    pub config_path: PathBuf,
    /// The loaded and validated daemon configuration. The constructor
    /// ensures it is always `Some` on success.
    pub daemon_config: Option<DaemonConfig>,
    /// The loaded auth token table. Missing file yields an empty table.
    pub tokens_config: Option<TokensConfig>,
}

impl ConfigManager {
    /// Creates a new `ConfigManager` and immediately loads the
    /// configuration, so a successfully created instance is always in a
    /// valid, loaded state.
    pub fn new(config_path: PathBuf) -> Result<Self> {
        // Accept either a directory containing daemon.toml or a direct
        // path to the file.
        let config_path = if config_path.is_dir() {
            config_path.join(DAEMON_CONFIG_FILE)
        } else {
            config_path
        };

        if !config_path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file does not exist: {}",
                config_path.display()
            ));
        }

        let mut manager = Self {
            config_path,
            daemon_config: None,
            tokens_config: None,
        };
        manager.load_config()?;

        Ok(manager)
    }

    /// Loads both configuration files from disk, parses and validates them.
    pub fn load_config(&mut self) -> Result<()> {
        info!(
            "Loading daemon configuration from {}",
            self.config_path.display()
        );

        let config_content = std::fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read {}", self.config_path.display()))?;
        let daemon_config = DaemonConfig::from_toml_str(&config_content)
            .with_context(|| format!("Invalid configuration in {}", self.config_path.display()))?;

        debug!("Daemon configuration parameters (including defaults):");
        debug!("  listen_address: {}", daemon_config.listen_address);
        debug!("  worker_count: {}", daemon_config.worker_count);
        debug!(
            "  max_concurrent_tasks: {}",
            daemon_config.max_concurrent_tasks
        );
        debug!(
            "  scheduler_tick_interval_ms: {}",
            daemon_config.scheduler_tick_interval_ms
        );
        debug!(
            "  task_unresponsive_timeout_seconds: {}",
            daemon_config.task_unresponsive_timeout_seconds
        );
        debug!(
            "  task_abandoned_timeout_seconds: {}",
            daemon_config.task_abandoned_timeout_seconds
        );

        let tokens_path = self.resolve_tokens_path(&daemon_config);
        let tokens_config = if tokens_path.exists() {
            let tokens_content = std::fs::read_to_string(&tokens_path)
                .with_context(|| format!("Failed to read {}", tokens_path.display()))?;
            TokensConfig::from_toml_str(&tokens_content)
                .with_context(|| format!("Invalid token table in {}", tokens_path.display()))?
        } else {
            // A daemon without tokens can still serve /health; every API
            // call will be rejected until a table is provided.
            warn!(
                "Token table {} does not exist, no API caller can authenticate",
                tokens_path.display()
            );
            TokensConfig::default()
        };
        info!(
            token_count = tokens_config.tokens.len(),
            "Auth token table loaded"
        );

        self.daemon_config = Some(daemon_config);
        self.tokens_config = Some(tokens_config);
        Ok(())
    }

    /// Apply command-line overrides on top of the loaded configuration and
    /// re-validate the result.
    pub fn apply_overrides(
        &mut self,
        listen_address: Option<String>,
        worker_count: Option<usize>,
        max_concurrent_tasks: Option<usize>,
        worker_exec_path: Option<String>,
    ) -> Result<()> {
        let config = self
            .daemon_config
            .as_mut()
            .context("Daemon configuration not loaded")?;

        if let Some(listen_address) = listen_address {
            config.listen_address = listen_address;
        }
        if let Some(worker_count) = worker_count {
            config.worker_count = worker_count;
        }
        if let Some(max_concurrent_tasks) = max_concurrent_tasks {
            config.max_concurrent_tasks = max_concurrent_tasks;
        }
        if let Some(worker_exec_path) = worker_exec_path {
            config.worker_exec_path = Some(worker_exec_path);
        }

        config
            .validate()
            .context("Invalid configuration after applying command-line overrides")
    }

    /// Path of the token table: the configured path (relative paths are
    /// resolved against the config file's directory) or the default
    /// sibling file.
    fn resolve_tokens_path(&self, config: &DaemonConfig) -> PathBuf {
        let config_dir = self
            .config_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        match &config.auth_tokens_file {
            Some(path) => {
                let path = PathBuf::from(path);
                if path.is_absolute() {
                    path
                } else {
                    config_dir.join(path)
                }
            }
            None => config_dir.join(DEFAULT_TOKENS_FILE),
        }
    }

    /// Path of the worker executable: the configured path or a binary
    /// named "worker" next to the daemon binary.
    pub fn resolve_worker_exec(&self) -> Result<PathBuf> {
        let config = self
            .daemon_config
            .as_ref()
            .context("Daemon configuration not loaded")?;

        if let Some(path) = &config.worker_exec_path {
            return Ok(PathBuf::from(path));
        }

        let current_exe = std::env::current_exe().context("Cannot locate the daemon binary")?;
        let exec_dir = current_exe
            .parent()
            .context("Daemon binary has no parent directory")?;
        Ok(exec_dir.join("worker"))
    }
}
