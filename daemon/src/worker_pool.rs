//! Worker pool: spawning, supervising and signalling worker processes
//!
//! The pool keeps a fixed number of worker slots. Each live slot holds a
//! child process connected to the message bus by a pair of forwarder
//! tasks: one claims dispatch envelopes and writes them to the worker's
//! stdin, the other decodes the worker's stdout lines onto the upstream
//! queue. Dead workers are detected and respawned during the scheduler's
//! maintenance step; the pool never replaces a worker mid-tick.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use shared::WorkerMessage;

use crate::bus::WorkerEndpoints;

/// Failure modes of signal delivery.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// The target exited before the signal was delivered.
    #[error("process {0} not found")]
    ProcessNotFound(u32),
    #[error("failed to signal process {pid} (errno {errno})")]
    Os { pid: u32, errno: i32 },
}

/// Delivery of cooperative-termination requests to worker processes.
///
/// The contract is delivery of a termination request by OS-appropriate
/// means, not a particular signal number. Tests substitute a recording
/// implementation.
pub trait ProcessSignaler: Send + Sync {
    fn terminate(&self, pid: u32) -> Result<(), SignalError>;
}

/// Signaler backed by SIGTERM on unix. On other targets termination
/// relies on the pool dropping the child handle (`kill_on_drop`).
#[derive(Debug, Default)]
pub struct OsSignaler;

impl ProcessSignaler for OsSignaler {
    #[cfg(unix)]
    fn terminate(&self, pid: u32) -> Result<(), SignalError> {
        // SAFETY: kill(2) with SIGTERM on a pid we spawned; the worst a
        // stale pid can do here is hit an unrelated process we do not own,
        // which kill reports as EPERM rather than delivering.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            return Ok(());
        }
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        if errno == libc::ESRCH {
            Err(SignalError::ProcessNotFound(pid))
        } else {
            Err(SignalError::Os { pid, errno })
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self, pid: u32) -> Result<(), SignalError> {
        warn!(pid, "No signal delivery on this platform, worker will be dropped");
        Ok(())
    }
}

/// Supervision interface the scheduler drives once per tick.
pub trait WorkerPool: Send {
    /// Reap dead workers and respawn replacements. Returns the pids of
    /// workers found dead since the last call.
    fn maintain(&mut self) -> Vec<u32>;

    /// Number of currently live workers.
    fn alive_workers(&self) -> usize;

    /// Terminate all workers; called once when the scheduler stops.
    fn shutdown(&mut self);
}

/// One live worker process and its forwarder tasks.
struct WorkerHandle {
    pid: u32,
    child: Child,
    writer: tokio::task::JoinHandle<()>,
    reader: tokio::task::JoinHandle<()>,
}

impl WorkerHandle {
    fn abort_forwarders(&self) {
        self.writer.abort();
        self.reader.abort();
    }
}

/// Pool of real worker subprocesses.
pub struct ProcessWorkerPool {
    exec_path: PathBuf,
    endpoints: WorkerEndpoints,
    /// Fixed-size slot table; `None` marks a slot whose worker died and
    /// could not yet be respawned.
    slots: Vec<Option<WorkerHandle>>,
}

impl ProcessWorkerPool {
    /// Create a pool of `worker_count` empty slots. Workers are spawned by
    /// the first `maintain` call, so construction itself cannot fail.
    pub fn new(worker_count: usize, exec_path: PathBuf, endpoints: WorkerEndpoints) -> Self {
        let mut slots = Vec::with_capacity(worker_count);
        slots.resize_with(worker_count, || None);
        Self {
            exec_path,
            endpoints,
            slots,
        }
    }

    fn spawn_worker(&self) -> Result<WorkerHandle> {
        let mut command = Command::new(&self.exec_path);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn worker {}", self.exec_path.display()))?;
        let pid = child
            .id()
            .context("Spawned worker has no pid (already reaped)")?;

        let stdin = child
            .stdin
            .take()
            .context("Spawned worker has no stdin pipe")?;
        let stdout = child
            .stdout
            .take()
            .context("Spawned worker has no stdout pipe")?;

        let writer = tokio::spawn(run_dispatch_forwarder(
            pid,
            stdin,
            self.endpoints.clone(),
        ));
        let reader = tokio::spawn(run_upstream_forwarder(
            pid,
            stdout,
            self.endpoints.clone(),
        ));

        info!(pid, exec = %self.exec_path.display(), "Spawned worker process");
        Ok(WorkerHandle {
            pid,
            child,
            writer,
            reader,
        })
    }
}

impl WorkerPool for ProcessWorkerPool {
    fn maintain(&mut self) -> Vec<u32> {
        let mut dead = Vec::new();

        // Reap exited workers first so their slots can be refilled below.
        for slot in self.slots.iter_mut() {
            let exited = match slot {
                Some(handle) => match handle.child.try_wait() {
                    Ok(Some(status)) => {
                        warn!(pid = handle.pid, %status, "Worker process exited");
                        true
                    }
                    Ok(None) => false,
                    Err(e) => {
                        error!(pid = handle.pid, error = %e, "Failed to poll worker, dropping it");
                        true
                    }
                },
                None => false,
            };
            if exited {
                if let Some(handle) = slot.take() {
                    handle.abort_forwarders();
                    dead.push(handle.pid);
                }
            }
        }

        for index in 0..self.slots.len() {
            if self.slots[index].is_none() {
                match self.spawn_worker() {
                    Ok(handle) => self.slots[index] = Some(handle),
                    Err(e) => {
                        // Leave the slot empty; the next tick retries.
                        error!(error = %e, "Failed to respawn worker");
                    }
                }
            }
        }

        dead
    }

    fn alive_workers(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    fn shutdown(&mut self) {
        let signaler = OsSignaler;
        for slot in self.slots.iter_mut() {
            if let Some(handle) = slot.take() {
                handle.abort_forwarders();
                if let Err(e) = signaler.terminate(handle.pid) {
                    debug!(pid = handle.pid, error = %e, "Worker already gone at shutdown");
                }
                // `kill_on_drop` cleans up anything that ignores the request.
            }
        }
        info!("Worker pool shut down");
    }
}

/// Claims envelopes from the shared dispatch queue and writes them to one
/// worker's stdin. The claim lock is held only while waiting for an
/// envelope, never while writing, so a slow worker does not block its
/// siblings from claiming work.
async fn run_dispatch_forwarder(
    pid: u32,
    mut stdin: tokio::process::ChildStdin,
    endpoints: WorkerEndpoints,
) {
    loop {
        let envelope = {
            let mut rx = endpoints.dispatch_rx.lock().await;
            match rx.recv().await {
                Some(envelope) => envelope,
                None => break,
            }
        };

        let line = match envelope.encode() {
            Ok(line) => line,
            Err(e) => {
                error!(pid, task_id = %envelope.task_id, error = %e, "Failed to encode envelope");
                continue;
            }
        };

        let task_id = envelope.task_id.clone();
        if let Err(e) = stdin.write_all(format!("{}\n", line).as_bytes()).await {
            // The worker died with an envelope claimed but not delivered.
            // Push it back so another worker can pick the task up.
            warn!(pid, task_id = %task_id, error = %e, "Worker pipe closed, requeueing envelope");
            if endpoints.dispatch_tx.try_send(envelope).is_err() {
                error!(pid, task_id = %task_id, "Could not requeue envelope, task will time out");
            }
            break;
        }
        debug!(pid, task_id = %task_id, "Envelope delivered to worker");
    }
}

/// Decodes one worker's stdout lines onto the upstream queue.
async fn run_upstream_forwarder(
    pid: u32,
    stdout: tokio::process::ChildStdout,
    endpoints: WorkerEndpoints,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match WorkerMessage::decode(&line) {
                Ok(message) => {
                    if endpoints.upstream_tx.send(message).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(pid, error = %e, "Dropping malformed worker message");
                }
            },
            Ok(None) => break,
            Err(e) => {
                warn!(pid, error = %e, "Worker stdout read failed");
                break;
            }
        }
    }
    debug!(pid, "Upstream forwarder finished");
}
