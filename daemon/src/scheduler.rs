//! Scheduler loop: the single writer of task state
//!
//! The scheduler ticks on a fixed interval. One tick runs six ordered
//! steps under the registry lock: drain upstream messages, honor recorded
//! kill requests, detect defunct workers, detect overall timeouts,
//! maintain the pool and dispatch queued work, and reap abandoned
//! records. A tick never blocks on the bus and never propagates an error;
//! every failure path reduces to a task-local transition or a log entry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use shared::{TaskKillReason, TaskState, WorkerMessage};

use crate::bus::MessageBus;
use crate::clock::Clock;
use crate::registry::TaskRegistry;
use crate::worker_pool::{ProcessSignaler, WorkerPool};

/// Upper bound on messages drained per tick. A chatty worker can fill the
/// upstream queue faster than one drain; bounding the batch keeps kill
/// handling and dispatch responsive.
const MAX_MESSAGES_PER_TICK: usize = 128;

/// Timing windows the scheduler enforces.
#[derive(Debug, Clone)]
pub struct SchedulerTimeouts {
    pub tick_interval: Duration,
    pub unresponsive_window: Duration,
    pub abandoned_window: Duration,
}

pub struct Scheduler {
    registry: Arc<Mutex<TaskRegistry>>,
    bus: MessageBus,
    pool: Box<dyn WorkerPool>,
    signaler: Arc<dyn ProcessSignaler>,
    clock: Arc<dyn Clock>,
    timeouts: SchedulerTimeouts,
}

impl Scheduler {
    pub fn new(
        registry: Arc<Mutex<TaskRegistry>>,
        bus: MessageBus,
        pool: Box<dyn WorkerPool>,
        signaler: Arc<dyn ProcessSignaler>,
        clock: Arc<dyn Clock>,
        timeouts: SchedulerTimeouts,
    ) -> Self {
        Self {
            registry,
            bus,
            pool,
            signaler,
            clock,
            timeouts,
        }
    }

    /// Tick until the shutdown channel fires, then terminate the pool.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            tick_ms = self.timeouts.tick_interval.as_millis() as u64,
            "Scheduler started"
        );
        let mut interval = tokio::time::interval(self.timeouts.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown_rx.recv() => {
                    debug!("Scheduler received shutdown signal");
                    break;
                }
            }
        }

        self.pool.shutdown();
        info!("Scheduler stopped");
    }

    /// One scheduler iteration. Public so tests can drive it directly
    /// with a virtual clock instead of waiting on the interval.
    pub async fn tick(&mut self) {
        let now = self.clock.now();
        let mut registry = self.registry.lock().await;

        // 1. Drain inbound messages (bounded batch per tick).
        for _ in 0..MAX_MESSAGES_PER_TICK {
            let Some(message) = self.bus.try_next_upstream() else {
                break;
            };
            self.apply_message(&mut registry, message, now);
        }

        // 2. Honor kill requests recorded since the last tick.
        for task in registry.iter_live_mut() {
            if task.is_kill_requested() && task.state() != TaskState::Finished {
                debug!(task_id = %task.id(), state = ?task.state(), "Killing task");
                task.kill(self.signaler.as_ref(), now);
            }
        }

        // 3. Detect defunct workers: executing tasks gone silent.
        for task in registry.iter_live_mut() {
            if task.is_defunct(self.timeouts.unresponsive_window, now) {
                warn!(
                    task_id = %task.id(),
                    pid = task.worker_pid(),
                    "Worker unresponsive, killing task"
                );
                task.request_kill(TaskKillReason::InternalMessaging);
                task.kill(self.signaler.as_ref(), now);
            }
        }

        // 4. Detect overall command timeouts. The kill itself happens in
        // step 2 of the next tick.
        for task in registry.iter_live_mut() {
            if matches!(task.state(), TaskState::Queued | TaskState::Executed)
                && task.is_timed_out_overall(now)
                && !task.is_kill_requested()
            {
                info!(task_id = %task.id(), "Task exceeded its overall timeout");
                task.request_kill(TaskKillReason::CompletionTimeout);
            }
        }

        // 5. Pool maintenance, then dispatch queued work FIFO.
        for pid in self.pool.maintain() {
            if let Some(task) = registry.executed_task_by_pid_mut(pid) {
                error!(task_id = %task.id(), pid, "Worker crashed while executing task");
                task.force_finish_internal_error(now);
            }
        }

        let mut idle = self
            .pool
            .alive_workers()
            .saturating_sub(registry.busy_slots());
        while idle > 0 {
            let Some(task_id) = registry.oldest_created() else {
                break;
            };
            // oldest_created only returns live ids
            let Some(task) = registry.task_mut(&task_id) else {
                break;
            };
            match self.bus.try_dispatch(task.dispatch_envelope()) {
                Ok(()) => {
                    task.mark_queued();
                    debug!(task_id = %task_id, "Task dispatched to worker pool");
                    idle -= 1;
                }
                Err(TrySendError::Full(_)) => {
                    // Workers saturated; resume dispatching next tick.
                    break;
                }
                Err(TrySendError::Closed(_)) => {
                    error!("Dispatch queue closed, cannot hand out work");
                    break;
                }
            }
        }

        // 6. Reap abandoned records.
        let abandoned: Vec<String> = registry
            .iter_live()
            .filter(|task| task.is_abandoned(self.timeouts.abandoned_window, now))
            .map(|task| task.id().to_string())
            .collect();
        for task_id in abandoned {
            debug!(task_id = %task_id, "Reaping abandoned task");
            registry.delete(&task_id);
        }
    }

    /// Apply one upstream message to its target task. Messages for absent
    /// tasks are dropped; a misbehaving worker fails its task and gets
    /// signalled.
    fn apply_message(
        &self,
        registry: &mut TaskRegistry,
        message: WorkerMessage,
        now: Instant,
    ) {
        let Some(task) = registry.task_mut(&message.task_id) else {
            debug!(
                task_id = %message.task_id,
                kind = message.payload.kind(),
                "Dropping message for unknown task"
            );
            return;
        };

        if let Err(e) = task.receive_message(message.payload, now) {
            warn!(task_id = %task.id(), error = %e, "Worker protocol error, failing task");
            if task.state() == TaskState::Executed {
                if let Some(pid) = task.worker_pid() {
                    if let Err(e) = self.signaler.terminate(pid) {
                        debug!(pid, error = %e, "Could not signal misbehaving worker");
                    }
                }
            }
            task.force_finish_internal_error(now);
        }
    }
}
