//! End-to-end tests for the scheduler loop
//!
//! Each test drives ticks by hand against a virtual clock, playing the
//! worker side of the bus directly. No real processes, no real sleeping.

use std::time::Duration;

use shared::{
    Command, ReportItem, TaskFinishType, TaskKillReason, TaskState, WorkerMessage,
};

use crate::registry::RegistryError;
use crate::tests::test_utils::{
    harness, harness_with_default_timeout, ABANDONED_TIMEOUT_S, UNRESPONSIVE_TIMEOUT_S,
};

#[tokio::test]
async fn test_happy_path_to_collection_and_reaping() {
    let mut h = harness(4);

    let task_id = h.create_task(Command::named("noop")).await;
    assert_eq!(TaskState::Created, h.get(&task_id).await.unwrap().state);

    // First tick dispatches the task.
    h.scheduler.tick().await;
    let envelope = h.claim_dispatch().await.expect("envelope not dispatched");
    assert_eq!(task_id, envelope.task_id);
    assert_eq!("noop", envelope.command.name);
    assert_eq!(TaskState::Queued, h.get(&task_id).await.unwrap().state);

    // The worker claims it and runs it to completion.
    h.send(WorkerMessage::task_executed(&task_id, 1001)).await;
    h.scheduler.tick().await;
    assert_eq!(TaskState::Executed, h.get(&task_id).await.unwrap().state);

    h.send(WorkerMessage::task_finished(
        &task_id,
        TaskFinishType::Success,
        Some(serde_json::json!("ok")),
    ))
    .await;
    h.scheduler.tick().await;

    let dto = h.get(&task_id).await.unwrap();
    assert_eq!(TaskState::Finished, dto.state);
    assert_eq!(TaskFinishType::Success, dto.task_finish_type);
    assert_eq!(Some(serde_json::json!("ok")), dto.result);
    assert!(dto.reports.is_empty());
    assert!(h.signaler.terminated().is_empty());

    // The result stays collectable until the abandonment window passes.
    h.clock.advance_secs(ABANDONED_TIMEOUT_S);
    h.scheduler.tick().await;
    assert!(h.get(&task_id).await.is_ok());

    h.clock.advance_secs(1);
    h.scheduler.tick().await;
    assert!(matches!(
        h.get(&task_id).await,
        Err(RegistryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_pre_dispatch_kill_never_reaches_workers() {
    let mut h = harness(4);

    let task_id = h.create_task(Command::named("noop")).await;
    h.kill(&task_id).await;

    h.scheduler.tick().await;

    let dto = h.get(&task_id).await.unwrap();
    assert_eq!(TaskState::Finished, dto.state);
    assert_eq!(TaskFinishType::Kill, dto.task_finish_type);
    assert_eq!(Some(TaskKillReason::User), dto.kill_reason);

    // No envelope was placed on the in-queue and no signal was sent.
    assert!(h.claim_dispatch().await.is_none());
    assert!(h.signaler.terminated().is_empty());
}

#[tokio::test]
async fn test_mid_execution_kill_signals_worker_and_drops_stragglers() {
    let mut h = harness(4);
    let task_id = h.run_to_executed(Command::named("noop"), 1002).await;

    h.kill(&task_id).await;
    h.scheduler.tick().await;

    assert_eq!(vec![1002], h.signaler.terminated());
    let dto = h.get(&task_id).await.unwrap();
    assert_eq!(TaskState::Finished, dto.state);
    assert_eq!(TaskFinishType::Kill, dto.task_finish_type);
    assert_eq!(Some(TaskKillReason::User), dto.kill_reason);

    // The worker's own TaskFinished raced with the kill and lost; the
    // record stays terminal with the kill outcome.
    h.send(WorkerMessage::task_finished(
        &task_id,
        TaskFinishType::Success,
        Some(serde_json::json!("late")),
    ))
    .await;
    h.scheduler.tick().await;

    let dto = h.get(&task_id).await.unwrap();
    assert_eq!(TaskFinishType::Kill, dto.task_finish_type);
    assert_eq!(None, dto.result);
}

#[tokio::test]
async fn test_kill_queued_task_takes_effect_after_claim() {
    let mut h = harness(4);

    let task_id = h.create_task(Command::named("noop")).await;
    h.scheduler.tick().await;
    assert_eq!(TaskState::Queued, h.get(&task_id).await.unwrap().state);

    // Kill while the envelope sits unclaimed: no signal, still Queued.
    h.kill(&task_id).await;
    h.scheduler.tick().await;
    assert_eq!(TaskState::Queued, h.get(&task_id).await.unwrap().state);
    assert!(h.signaler.terminated().is_empty());

    // Once a worker claims the task, the next tick delivers the kill.
    h.send(WorkerMessage::task_executed(&task_id, 1005)).await;
    h.scheduler.tick().await;

    let dto = h.get(&task_id).await.unwrap();
    assert_eq!(TaskState::Finished, dto.state);
    assert_eq!(TaskFinishType::Kill, dto.task_finish_type);
    assert_eq!(vec![1005], h.signaler.terminated());
}

#[tokio::test]
async fn test_unresponsive_worker_is_killed() {
    let mut h = harness(4);
    let task_id = h.run_to_executed(Command::named("noop"), 1003).await;

    // Exactly at the window the task is not yet defunct.
    h.clock.advance_secs(UNRESPONSIVE_TIMEOUT_S);
    h.scheduler.tick().await;
    assert_eq!(TaskState::Executed, h.get(&task_id).await.unwrap().state);
    assert!(h.signaler.terminated().is_empty());

    h.clock.advance_secs(1);
    h.scheduler.tick().await;

    let dto = h.get(&task_id).await.unwrap();
    assert_eq!(TaskState::Finished, dto.state);
    assert_eq!(TaskFinishType::Kill, dto.task_finish_type);
    assert_eq!(Some(TaskKillReason::InternalMessaging), dto.kill_reason);
    assert_eq!(vec![1003], h.signaler.terminated());
}

#[tokio::test]
async fn test_command_timeout_kills_across_two_ticks() {
    let mut h = harness(4);
    let mut command = Command::named("slow_op");
    command.options.request_timeout = Some(5);
    let task_id = h.create_task(command).await;

    h.scheduler.tick().await;
    h.claim_dispatch().await.expect("envelope");
    h.send(WorkerMessage::task_executed(&task_id, 1004)).await;
    h.scheduler.tick().await;

    // Progress at t=3 refreshes liveness but not the overall deadline.
    h.clock.advance_secs(3);
    h.send(WorkerMessage::report(
        &task_id,
        ReportItem::info("PROGRESS", "halfway"),
    ))
    .await;
    h.scheduler.tick().await;
    assert_eq!(TaskState::Executed, h.get(&task_id).await.unwrap().state);

    // At t=6 the timeout has elapsed; this tick records the kill request.
    h.clock.advance_secs(3);
    h.scheduler.tick().await;
    let dto = h.get(&task_id).await.unwrap();
    assert_eq!(Some(TaskKillReason::CompletionTimeout), dto.kill_reason);

    // The next tick honors it.
    h.scheduler.tick().await;
    let dto = h.get(&task_id).await.unwrap();
    assert_eq!(TaskState::Finished, dto.state);
    assert_eq!(TaskFinishType::Kill, dto.task_finish_type);
    assert_eq!(vec![1004], h.signaler.terminated());
}

#[tokio::test]
async fn test_daemon_default_timeout_applies() {
    let mut h = harness_with_default_timeout(4, Some(Duration::from_secs(7)));
    let task_id = h.run_to_executed(Command::named("noop"), 1010).await;

    h.clock.advance_secs(8);
    h.scheduler.tick().await;
    h.scheduler.tick().await;

    let dto = h.get(&task_id).await.unwrap();
    assert_eq!(TaskFinishType::Kill, dto.task_finish_type);
    assert_eq!(Some(TaskKillReason::CompletionTimeout), dto.kill_reason);
}

#[tokio::test]
async fn test_unknown_payload_fails_task_and_signals_worker() {
    let mut h = harness(4);
    let task_id = h.run_to_executed(Command::named("noop"), 1006).await;

    // A buggy worker emits a payload kind the daemon does not know.
    let line = r#"{"task_id": "TASK", "kind": "gibberish"}"#.replace("TASK", &task_id);
    h.send(WorkerMessage::decode(&line).unwrap()).await;
    h.scheduler.tick().await;

    let dto = h.get(&task_id).await.unwrap();
    assert_eq!(TaskState::Finished, dto.state);
    assert_eq!(TaskFinishType::InternalError, dto.task_finish_type);
    assert_eq!(vec![1006], h.signaler.terminated());
}

#[tokio::test]
async fn test_protocol_violation_fails_task_and_signals_worker() {
    let mut h = harness(4);
    let task_id = h.run_to_executed(Command::named("noop"), 1007).await;

    // Duplicate TaskExecuted while already executing.
    h.send(WorkerMessage::task_executed(&task_id, 1007)).await;
    h.scheduler.tick().await;

    let dto = h.get(&task_id).await.unwrap();
    assert_eq!(TaskFinishType::InternalError, dto.task_finish_type);
    assert_eq!(vec![1007], h.signaler.terminated());
}

#[tokio::test]
async fn test_message_for_unknown_task_is_dropped() {
    let mut h = harness(4);
    h.send(WorkerMessage::task_executed("nosuchtask", 1008)).await;
    // Must not panic or signal anything.
    h.scheduler.tick().await;
    assert!(h.signaler.terminated().is_empty());
}

#[tokio::test]
async fn test_dispatch_is_fifo_and_bounded_by_idle_workers() {
    let mut h = harness(2);

    let first = h.create_task(Command::named("a")).await;
    h.clock.advance(Duration::from_millis(1));
    let second = h.create_task(Command::named("b")).await;
    h.clock.advance(Duration::from_millis(1));
    let third = h.create_task(Command::named("c")).await;

    h.scheduler.tick().await;

    // Two workers, so exactly the two oldest tasks went out, in order.
    assert_eq!(first, h.claim_dispatch().await.unwrap().task_id);
    assert_eq!(second, h.claim_dispatch().await.unwrap().task_id);
    assert!(h.claim_dispatch().await.is_none());
    assert_eq!(TaskState::Created, h.get(&third).await.unwrap().state);

    // Finishing one task frees its slot for the third.
    h.send(WorkerMessage::task_executed(&first, 2001)).await;
    h.send(WorkerMessage::task_finished(
        &first,
        TaskFinishType::Success,
        None,
    ))
    .await;
    h.scheduler.tick().await;

    assert_eq!(third, h.claim_dispatch().await.unwrap().task_id);
    assert_eq!(TaskState::Queued, h.get(&third).await.unwrap().state);
}

#[tokio::test]
async fn test_worker_crash_fails_bound_task() {
    let mut h = harness(4);
    let task_id = h.run_to_executed(Command::named("noop"), 1009).await;

    // The pool reports the worker dead at the next maintenance pass.
    h.dead_pids.lock().unwrap().push(1009);
    h.scheduler.tick().await;

    let dto = h.get(&task_id).await.unwrap();
    assert_eq!(TaskState::Finished, dto.state);
    assert_eq!(TaskFinishType::InternalError, dto.task_finish_type);
}

#[tokio::test]
async fn test_crash_of_idle_worker_touches_no_task() {
    let mut h = harness(4);
    let task_id = h.run_to_executed(Command::named("noop"), 1011).await;

    // Some other worker died; the executing task is unaffected.
    h.dead_pids.lock().unwrap().push(9999);
    h.scheduler.tick().await;

    assert_eq!(TaskState::Executed, h.get(&task_id).await.unwrap().state);
}

#[tokio::test]
async fn test_reports_accumulate_in_arrival_order() {
    let mut h = harness(4);
    let task_id = h.run_to_executed(Command::named("noop"), 1012).await;

    for code in ["ONE", "TWO", "THREE"] {
        h.send(WorkerMessage::report(&task_id, ReportItem::info(code, code)))
            .await;
    }
    h.scheduler.tick().await;
    h.send(WorkerMessage::report(
        &task_id,
        ReportItem::info("FOUR", "FOUR"),
    ))
    .await;
    h.scheduler.tick().await;

    let codes: Vec<String> = h
        .get(&task_id)
        .await
        .unwrap()
        .reports
        .into_iter()
        .map(|r| r.code)
        .collect();
    assert_eq!(vec!["ONE", "TWO", "THREE", "FOUR"], codes);
}

#[tokio::test]
async fn test_state_is_monotone_through_the_whole_lifecycle() {
    let mut h = harness(4);
    let task_id = h.create_task(Command::named("noop")).await;
    let mut last_state = h.get(&task_id).await.unwrap().state;

    let mut observe = Vec::new();
    h.scheduler.tick().await;
    observe.push(h.get(&task_id).await.unwrap().state);
    h.claim_dispatch().await.unwrap();
    h.send(WorkerMessage::task_executed(&task_id, 1013)).await;
    h.scheduler.tick().await;
    observe.push(h.get(&task_id).await.unwrap().state);
    h.send(WorkerMessage::task_finished(
        &task_id,
        TaskFinishType::Success,
        None,
    ))
    .await;
    h.scheduler.tick().await;
    observe.push(h.get(&task_id).await.unwrap().state);

    for state in observe {
        assert!(state >= last_state, "state regressed: {:?}", state);
        last_state = state;
    }
    assert_eq!(TaskState::Finished, last_state);
}

#[tokio::test]
async fn test_kill_api_is_idempotent_end_to_end() {
    let mut h = harness(4);
    let task_id = h.run_to_executed(Command::named("noop"), 1014).await;

    for _ in 0..3 {
        h.kill(&task_id).await;
    }
    h.scheduler.tick().await;
    for _ in 0..3 {
        h.kill(&task_id).await;
    }
    h.scheduler.tick().await;

    let dto = h.get(&task_id).await.unwrap();
    assert_eq!(TaskState::Finished, dto.state);
    assert_eq!(TaskFinishType::Kill, dto.task_finish_type);
    assert_eq!(Some(TaskKillReason::User), dto.kill_reason);
    // One signal, despite six kill requests.
    assert_eq!(vec![1014], h.signaler.terminated());
}

#[tokio::test]
async fn test_no_workers_means_no_dispatch() {
    let mut h = harness(0);
    let task_id = h.create_task(Command::named("noop")).await;

    h.scheduler.tick().await;

    assert!(h.claim_dispatch().await.is_none());
    assert_eq!(TaskState::Created, h.get(&task_id).await.unwrap().state);
}
