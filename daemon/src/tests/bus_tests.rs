//! Tests for the message bus

use shared::{Command, DispatchEnvelope, TaskFinishType, WorkerMessage};

use crate::bus::MessageBus;
use crate::tests::test_utils::test_user;

fn envelope(task_id: &str) -> DispatchEnvelope {
    DispatchEnvelope {
        task_id: task_id.to_string(),
        command: Command::named("noop"),
        auth_user: test_user(),
    }
}

#[tokio::test]
async fn test_dispatched_envelope_reaches_a_worker_endpoint() {
    let bus = MessageBus::new(8);
    let endpoints = bus.worker_endpoints();

    bus.try_dispatch(envelope("t1")).unwrap();

    let claimed = endpoints.dispatch_rx.lock().await.try_recv().unwrap();
    assert_eq!("t1", claimed.task_id);
}

#[tokio::test]
async fn test_each_envelope_is_claimed_exactly_once() {
    let bus = MessageBus::new(8);
    let a = bus.worker_endpoints();
    let b = bus.worker_endpoints();

    bus.try_dispatch(envelope("t1")).unwrap();

    assert!(a.dispatch_rx.lock().await.try_recv().is_ok());
    assert!(b.dispatch_rx.lock().await.try_recv().is_err());
}

#[tokio::test]
async fn test_full_dispatch_queue_rejects_without_blocking() {
    let bus = MessageBus::new(1);
    bus.try_dispatch(envelope("t1")).unwrap();

    let err = bus.try_dispatch(envelope("t2")).unwrap_err();
    assert!(matches!(
        err,
        tokio::sync::mpsc::error::TrySendError::Full(_)
    ));
}

#[tokio::test]
async fn test_upstream_is_empty_when_nothing_was_sent() {
    let mut bus = MessageBus::new(8);
    assert!(bus.try_next_upstream().is_none());
}

#[tokio::test]
async fn test_upstream_preserves_per_task_order() {
    let mut bus = MessageBus::new(8);
    let endpoints = bus.worker_endpoints();

    endpoints
        .upstream_tx
        .send(WorkerMessage::task_executed("t1", 42))
        .await
        .unwrap();
    endpoints
        .upstream_tx
        .send(WorkerMessage::task_finished(
            "t1",
            TaskFinishType::Success,
            None,
        ))
        .await
        .unwrap();

    let first = bus.try_next_upstream().unwrap();
    let second = bus.try_next_upstream().unwrap();
    assert_eq!("task_executed", first.payload.kind());
    assert_eq!("task_finished", second.payload.kind());
    assert!(bus.try_next_upstream().is_none());
}

#[tokio::test]
async fn test_requeue_path_keeps_envelope_available() {
    // A forwarder that claimed an envelope but could not deliver it pushes
    // it back through its dispatch_tx handle.
    let bus = MessageBus::new(8);
    let endpoints = bus.worker_endpoints();

    bus.try_dispatch(envelope("t1")).unwrap();
    let claimed = endpoints.dispatch_rx.lock().await.try_recv().unwrap();
    endpoints.dispatch_tx.try_send(claimed).unwrap();

    let reclaimed = endpoints.dispatch_rx.lock().await.try_recv().unwrap();
    assert_eq!("t1", reclaimed.task_id);
}
