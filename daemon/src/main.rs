//! Cluster Control Daemon
//!
//! The daemon accepts cluster management commands over an authenticated
//! HTTP API and executes them asynchronously on a bounded pool of worker
//! processes. Callers get a task id back immediately and poll for
//! progress and results; a single-threaded scheduler loop owns every
//! task-state transition.
// This is the main entry point for the daemon application. It is responsible for:
// - Initializing logging and configuration.
// - Wiring the registry, message bus, worker pool and scheduler together.
// - Starting the HTTP API.
// - Handling graceful shutdown.

// Use jemalloc as the global allocator for better performance
#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

// The daemon is organized into modules for the HTTP surface, the task
// subsystem and configuration management.
mod api;
mod auth;
mod bus;
mod clock;
mod config;
mod registry;
mod scheduler;
mod task;
mod worker_pool;

#[cfg(test)]
mod tests;

use api::AppState;
use auth::AuthProvider;
use bus::MessageBus;
use clock::SystemClock;
use config::ConfigManager;
use registry::TaskRegistry;
use scheduler::{Scheduler, SchedulerTimeouts};
use worker_pool::{OsSignaler, ProcessWorkerPool};

/// Command-line arguments for the daemon
#[derive(Parser, Debug)]
#[command(name = "daemon")]
#[command(about = "Cluster control daemon that executes management commands asynchronously", long_about = None)]
struct CliArgs {
    /// Path to the configuration file (daemon.toml) or its directory
    #[arg(value_name = "CONFIG")]
    config_path: PathBuf,

    /// Override the listen address from the config file
    #[arg(long = "listen-address", value_name = "ADDRESS")]
    listen_address: Option<String>,

    /// Override the worker pool size from the config file
    #[arg(long = "worker-count", value_name = "N")]
    worker_count: Option<usize>,

    /// Override the live task bound from the config file
    #[arg(long = "max-concurrent-tasks", value_name = "N")]
    max_concurrent_tasks: Option<usize>,

    /// Override the worker executable path from the config file
    #[arg(long = "worker-exec", value_name = "PATH")]
    worker_exec: Option<String>,
}

/// The main application structure for the daemon.
/// It owns the shared registry, the running scheduler task and the
/// shutdown channel used to stop it.
pub struct Daemon {
    pub config_manager: ConfigManager,
    registry: Arc<Mutex<TaskRegistry>>,
    auth_provider: Arc<AuthProvider>,
    listen_address: SocketAddr,
    scheduler_handle: Option<JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Daemon {
    /// Creates and fully initializes a new daemon instance: loads the
    /// configuration, builds the task subsystem and starts the scheduler.
    /// Workers are spawned by the scheduler's first maintenance pass.
    pub fn new(config_manager: ConfigManager) -> Result<Self> {
        let daemon_config = config_manager
            .daemon_config
            .as_ref()
            .context("Daemon configuration not loaded")?
            .clone();
        let tokens_config = config_manager
            .tokens_config
            .as_ref()
            .context("Token table not loaded")?
            .clone();

        let listen_address: SocketAddr = daemon_config.listen_address.parse().map_err(|e| {
            anyhow::anyhow!(
                "Invalid listen address '{}': {}",
                daemon_config.listen_address,
                e
            )
        })?;

        let worker_exec = config_manager.resolve_worker_exec()?;
        info!(
            worker_exec = %worker_exec.display(),
            worker_count = daemon_config.worker_count,
            "Worker pool configured"
        );

        let clock = Arc::new(SystemClock);
        let registry = Arc::new(Mutex::new(TaskRegistry::new(
            daemon_config.max_concurrent_tasks,
            daemon_config.default_request_timeout(),
            clock.clone(),
        )));

        let bus = MessageBus::new(daemon_config.channel_buffer_size);
        let pool = ProcessWorkerPool::new(
            daemon_config.worker_count,
            worker_exec,
            bus.worker_endpoints(),
        );

        let scheduler = Scheduler::new(
            registry.clone(),
            bus,
            Box::new(pool),
            Arc::new(OsSignaler),
            clock,
            SchedulerTimeouts {
                tick_interval: daemon_config.tick_interval(),
                unresponsive_window: daemon_config.unresponsive_window(),
                abandoned_window: daemon_config.abandoned_window(),
            },
        );

        let (shutdown_tx, _) = broadcast::channel(1);
        let scheduler_handle = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));

        Ok(Self {
            config_manager,
            registry,
            auth_provider: Arc::new(AuthProvider::new(tokens_config)),
            listen_address,
            scheduler_handle: Some(scheduler_handle),
            shutdown_tx,
        })
    }

    /// Serves the HTTP API until the process is told to stop.
    pub async fn run(&mut self) -> Result<()> {
        let state = AppState::new(self.registry.clone(), self.auth_provider.clone());
        let router = api::create_router(state);

        info!("Starting HTTP API on {}", self.listen_address);
        let listener = tokio::net::TcpListener::bind(self.listen_address)
            .await
            .with_context(|| format!("Failed to bind {}", self.listen_address))?;

        axum::serve(listener, router)
            .await
            .context("HTTP server failed")?;
        Ok(())
    }

    /// Performs a graceful shutdown: stops the scheduler (which
    /// terminates the worker pool) and waits for it within the configured
    /// window.
    pub async fn shutdown(&mut self) {
        info!("Shutting down cluster control daemon");

        let _ = self.shutdown_tx.send(());

        if let Some(handle) = self.scheduler_handle.take() {
            let graceful_window = self
                .config_manager
                .daemon_config
                .as_ref()
                .map(|c| c.graceful_shutdown_timeout_seconds)
                .unwrap_or(10);
            match tokio::time::timeout(std::time::Duration::from_secs(graceful_window), handle)
                .await
            {
                Ok(_) => info!("Scheduler stopped cleanly"),
                Err(_) => warn!(
                    "Scheduler did not stop within {}s, abandoning it",
                    graceful_window
                ),
            }
        }

        info!("Cluster control daemon shutdown complete");
    }
}

// The `#[tokio::main]` attribute transforms the `async fn main` into a
// synchronous `fn main` that initializes a tokio runtime and runs the
// async code.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the logging framework (`tracing`); logs go to a daily
    // rolling file as structured JSON.
    let file_appender = tracing_appender::rolling::daily("./logs", "daemon.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Default directives are only used if RUST_LOG is not set.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("daemon=info,shared=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    let cli_args = CliArgs::parse();

    info!("Cluster control daemon starting up");
    info!("Configuration path: {}", cli_args.config_path.display());

    let mut config_manager = match ConfigManager::new(cli_args.config_path) {
        Ok(manager) => manager,
        Err(e) => {
            error!("FATAL: Failed to load configuration");
            error!("Error: {}", e);
            let mut current_error = e.source();
            while let Some(err) = current_error {
                error!("  Caused by: {}", err);
                current_error = err.source();
            }
            std::process::exit(1);
        }
    };

    if let Err(e) = config_manager.apply_overrides(
        cli_args.listen_address,
        cli_args.worker_count,
        cli_args.max_concurrent_tasks,
        cli_args.worker_exec,
    ) {
        error!("Failed to apply configuration overrides: {}", e);
        std::process::exit(1);
    }

    let mut daemon = match Daemon::new(config_manager) {
        Ok(daemon) => daemon,
        Err(e) => {
            error!("FATAL: Failed to initialize daemon: {}", e);
            std::process::exit(1);
        }
    };

    // Set up signal handling for graceful shutdown.
    let shutdown_signal = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate()).unwrap();
            let mut sigint = signal(SignalKind::interrupt()).unwrap();

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                },
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                },
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.unwrap();
            info!("Received Ctrl+C");
        }
    };

    // Run the daemon's HTTP surface and the shutdown signal handler
    // concurrently; whichever finishes first ends the select.
    tokio::select! {
        result = daemon.run() => {
            if let Err(e) = result {
                error!("Daemon error: {}", e);
                std::process::exit(1);
            }
        }
        _ = shutdown_signal => {
            info!("Shutdown signal received");
        }
    }

    daemon.shutdown().await;
    info!("Daemon shutdown complete");
    Ok(())
}
