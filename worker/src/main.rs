//! Cluster Command Worker
//!
//! The worker is a small process the daemon keeps in a pool. It blocks on
//! stdin for dispatch envelopes, executes one command at a time under the
//! caller's identity, and streams progress and the final outcome back on
//! stdout. Logs go to stderr only: stdout belongs to the message
//! protocol.

// Use jemalloc as the global allocator for better performance
#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWrite, BufReader};
use tracing::{error, info};

mod executor;

#[cfg(test)]
mod tests;

use executor::{CommandExecutor, CommandFailure, MessageSink};
use shared::{DispatchEnvelope, TaskFinishType, WorkerMessage};

/// Command-line arguments for the worker
#[derive(Parser, Debug)]
#[command(name = "worker")]
#[command(about = "Executes cluster management commands dispatched by the daemon", long_about = None)]
struct CliArgs {
    /// Log filter directives, overriding RUST_LOG
    #[arg(long = "log-filter", value_name = "FILTER")]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    // stderr writer keeps stdout clean for the protocol stream
    let env_filter = match &cli_args.log_filter {
        Some(filter) => tracing_subscriber::EnvFilter::new(filter),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("worker=info,shared=info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    info!(pid = std::process::id(), "Worker ready");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let executor = CommandExecutor::new();

    let mut lines = stdin.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let envelope = match DispatchEnvelope::decode(&line) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(error = %e, "Malformed dispatch envelope, skipping");
                continue;
            }
        };
        handle_envelope(&executor, envelope, &mut stdout).await?;
    }

    info!("Dispatch stream closed, worker exiting");
    Ok(())
}

/// Run one task from claim to finish message. The worker handles exactly
/// one task at a time; it only returns to the stdin loop once the finish
/// message is on the wire.
async fn handle_envelope<W: AsyncWrite + Unpin>(
    executor: &CommandExecutor,
    envelope: DispatchEnvelope,
    writer: &mut W,
) -> Result<()> {
    let task_id = envelope.task_id.clone();
    let mut sink = MessageSink::new(writer, &task_id);

    sink.send(WorkerMessage::task_executed(&task_id, std::process::id()))
        .await?;

    info!(
        task_id = %task_id,
        command = %envelope.command.name,
        username = %envelope.auth_user.username,
        "Task claimed"
    );

    let finish = match executor
        .execute(&envelope.command, &envelope.auth_user, &mut sink)
        .await
    {
        Ok(result) => WorkerMessage::task_finished(&task_id, TaskFinishType::Success, result),
        Err(CommandFailure::Handled(reports)) => {
            for report in reports {
                sink.report(report).await?;
            }
            WorkerMessage::task_finished(&task_id, TaskFinishType::Fail, None)
        }
        Err(CommandFailure::Internal(message)) => {
            error!(task_id = %task_id, error = %message, "Command failed unexpectedly");
            sink.report(shared::ReportItem::error("INTERNAL_ERROR", message))
                .await?;
            WorkerMessage::task_finished(&task_id, TaskFinishType::InternalError, None)
        }
    };

    sink.send(finish).await?;
    info!(task_id = %task_id, "Task finished");
    Ok(())
}
