//! Command execution for the worker process
//!
//! The executor dispatches on the command name and runs the matching
//! library procedure under the caller's identity. Progress reports are
//! streamed through a `MessageSink` as the command runs; the final
//! outcome is returned to the main loop, which turns it into the task's
//! finish message.

use anyhow::Result;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use shared::{AuthUser, Command, ReportItem, WorkerMessage};

/// Group a non-superuser caller must belong to before the library runs
/// anything on their behalf.
const REQUIRED_GROUP: &str = "haclient";

/// How a command run ended, short of a worker crash.
#[derive(Debug, thiserror::Error)]
pub enum CommandFailure {
    /// The library handled the error and described it in reports.
    #[error("command failed")]
    Handled(Vec<ReportItem>),
    /// Something the library could not handle; the task is failed with an
    /// internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type CommandResult = std::result::Result<Option<Value>, CommandFailure>;

/// Streams upstream messages for one task onto the protocol writer.
pub struct MessageSink<'a, W: AsyncWrite + Unpin> {
    writer: &'a mut W,
    task_id: &'a str,
}

impl<'a, W: AsyncWrite + Unpin> MessageSink<'a, W> {
    pub fn new(writer: &'a mut W, task_id: &'a str) -> Self {
        Self { writer, task_id }
    }

    pub async fn report(&mut self, item: ReportItem) -> Result<()> {
        self.send(WorkerMessage::report(self.task_id, item)).await
    }

    pub async fn send(&mut self, message: WorkerMessage) -> Result<()> {
        let line = message.encode()?;
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Dispatches command names onto the built-in library procedures.
#[derive(Debug, Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run one command to completion under the caller's identity.
    pub async fn execute<W: AsyncWrite + Unpin>(
        &self,
        command: &Command,
        auth_user: &AuthUser,
        sink: &mut MessageSink<'_, W>,
    ) -> CommandResult {
        debug!(
            command = %command.name,
            username = %auth_user.username,
            "Executing command"
        );

        if let Err(denied) = check_permission(auth_user) {
            return Err(CommandFailure::Handled(vec![denied]));
        }

        match command.name.as_str() {
            "noop" => Ok(Some(Value::String("ok".to_string()))),
            "echo" => run_echo(command, sink).await,
            "sleep" => run_sleep(command, sink).await,
            "fail" => Err(CommandFailure::Handled(vec![ReportItem::error(
                "COMMAND_FAILED",
                "the fail command always fails",
            )])),
            _ => Err(CommandFailure::Handled(vec![ReportItem::error(
                "COMMAND_UNKNOWN",
                format!("unknown command '{}'", command.name),
            )])),
        }
    }
}

/// Callers act through the cluster group unless they are the superuser.
fn check_permission(auth_user: &AuthUser) -> std::result::Result<(), ReportItem> {
    if auth_user.is_superuser || auth_user.groups.iter().any(|g| g == REQUIRED_GROUP) {
        Ok(())
    } else {
        Err(
            ReportItem::error("PERMISSION_DENIED", "caller lacks cluster permissions")
                .with_context(serde_json::json!({
                    "username": auth_user.username,
                    "required_group": REQUIRED_GROUP,
                })),
        )
    }
}

/// Returns the caller's params untouched; handy for exercising the full
/// round trip through a live pool.
async fn run_echo<W: AsyncWrite + Unpin>(
    command: &Command,
    sink: &mut MessageSink<'_, W>,
) -> CommandResult {
    sink.report(ReportItem::info("ECHO_STARTED", "echoing params back"))
        .await
        .map_err(|e| CommandFailure::Internal(e.to_string()))?;
    Ok(Some(Value::Object(command.params.clone())))
}

/// Sleeps for `params.seconds`, reporting once per second. Used to test
/// kills and timeouts against a live pool.
async fn run_sleep<W: AsyncWrite + Unpin>(
    command: &Command,
    sink: &mut MessageSink<'_, W>,
) -> CommandResult {
    let seconds = match command.params.get("seconds") {
        Some(value) => value.as_u64().ok_or_else(|| {
            CommandFailure::Handled(vec![ReportItem::error(
                "INVALID_PARAM",
                "'seconds' must be a non-negative integer",
            )])
        })?,
        None => 1,
    };

    for elapsed in 0..seconds {
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        sink.report(
            ReportItem::info("SLEEP_PROGRESS", format!("slept {}s", elapsed + 1)),
        )
        .await
        .map_err(|e| CommandFailure::Internal(e.to_string()))?;
    }
    Ok(Some(serde_json::json!({ "slept_seconds": seconds })))
}
