//! Message bus between the scheduler and the worker pool
//!
//! Two bounded queues connect the daemon to its workers: dispatch
//! envelopes travel down to the pool, progress and finish messages travel
//! back up. The dispatch receiver sits behind a mutex so that any idle
//! worker forwarder can claim the next envelope; the upstream receiver is
//! owned by the scheduler alone. The scheduler side only ever uses
//! non-blocking operations, so a tick can never stall on the bus.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::sync::Mutex;

use shared::{DispatchEnvelope, WorkerMessage};

/// Queue endpoints handed to each worker forwarder.
#[derive(Clone)]
pub struct WorkerEndpoints {
    /// Shared claim point for dispatch envelopes. Whichever forwarder
    /// holds the lock when an envelope arrives takes it.
    pub dispatch_rx: Arc<Mutex<mpsc::Receiver<DispatchEnvelope>>>,
    /// Used to push an unclaimed envelope back when a worker dies between
    /// the claim and the write.
    pub dispatch_tx: mpsc::Sender<DispatchEnvelope>,
    /// Upstream message sink; one clone per forwarder.
    pub upstream_tx: mpsc::Sender<WorkerMessage>,
}

/// Daemon-side message bus. Owned by the scheduler.
pub struct MessageBus {
    dispatch_tx: mpsc::Sender<DispatchEnvelope>,
    dispatch_rx: Arc<Mutex<mpsc::Receiver<DispatchEnvelope>>>,
    upstream_tx: mpsc::Sender<WorkerMessage>,
    upstream_rx: mpsc::Receiver<WorkerMessage>,
}

impl MessageBus {
    /// Create a bus with the given capacity on both queues.
    pub fn new(capacity: usize) -> Self {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(capacity);
        let (upstream_tx, upstream_rx) = mpsc::channel(capacity);
        Self {
            dispatch_tx,
            dispatch_rx: Arc::new(Mutex::new(dispatch_rx)),
            upstream_tx,
            upstream_rx,
        }
    }

    /// Non-blocking enqueue of a dispatch envelope. `Full` means the
    /// workers are saturated and dispatch should stop for this tick.
    pub fn try_dispatch(
        &self,
        envelope: DispatchEnvelope,
    ) -> Result<(), TrySendError<DispatchEnvelope>> {
        self.dispatch_tx.try_send(envelope)
    }

    /// Non-blocking pop of the next upstream message, if any.
    pub fn try_next_upstream(&mut self) -> Option<WorkerMessage> {
        match self.upstream_rx.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Endpoints for wiring a worker forwarder onto the bus.
    pub fn worker_endpoints(&self) -> WorkerEndpoints {
        WorkerEndpoints {
            dispatch_rx: Arc::clone(&self.dispatch_rx),
            dispatch_tx: self.dispatch_tx.clone(),
            upstream_tx: self.upstream_tx.clone(),
        }
    }
}
