//! Cancellation and quiescence: idempotent cancel, bulk cancellation, and
//! waiting out asynchronous settling.

mod common;

use std::time::Duration;

use common::{MockTransport, Step, head_ok, init_tracing};
use rstest::rstest;
use wireprobe::{AssertionStatus, ProbeHarness, ProbeRequest, TaskState, TransportError};

fn hanging_harness() -> ProbeHarness {
    ProbeHarness::builder()
        .transport(MockTransport::scripted(vec![head_ok(), Step::Hang]))
        .build()
        .expect("build harness")
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn cancel_returns_true_then_false() {
    init_tracing();
    let harness = hanging_harness();
    let results = harness
        .launch(ProbeRequest::get("http://localhost/hang"), |a| {
            a.body_equals("never");
        })
        .await
        .expect("launch");

    assert!(results.cancel());
    assert!(!results.cancel());

    results.await_complete().await;
    assert_eq!(results.state(), TaskState::Cancelled);
    let produced = results.all_results();
    assert_eq!(produced.len(), 1);
    assert_eq!(produced[0].status(), AssertionStatus::DidNotRun);
    // Swept specs are reported, not raised, even at fatal severity.
    results
        .assert_no_failures()
        .await
        .expect("did-not-run is not a failure");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn user_cancellation_surfaces_to_thrown_specs() {
    let harness = hanging_harness();
    let results = harness
        .launch(ProbeRequest::get("http://localhost/hang"), |a| {
            a.thrown("cancelled on request", |cause| {
                matches!(cause, TransportError::Cancelled)
            });
        })
        .await
        .expect("launch");

    // Let the transport reach its hang point before cancelling.
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(results.cancel());
    results.await_complete().await;

    let produced = results.all_results();
    assert_eq!(produced.len(), 1);
    assert_eq!(produced[0].status(), AssertionStatus::Success);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn cancel_all_flips_each_running_task_once() {
    let harness = hanging_harness();
    for index in 0..3 {
        harness
            .launch(
                ProbeRequest::get(format!("http://localhost/hang/{index}")),
                |_| {},
            )
            .await
            .expect("launch");
    }
    tokio::time::sleep(Duration::from_millis(5)).await;

    let registry = harness.registry();
    assert_eq!(registry.running_count(), 3);
    assert_eq!(registry.cancel_all().len(), 3);
    // Idempotence: nothing left to flip.
    assert!(registry.cancel_all().is_empty());

    assert!(registry.await_quiet(Duration::from_secs(1), false).await);
    assert!(
        registry
            .tasks()
            .iter()
            .all(|task| task.state() == TaskState::Cancelled)
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn quiesce_kills_stragglers_when_asked() {
    let harness = hanging_harness();
    harness
        .launch(ProbeRequest::get("http://localhost/hang"), |_| {})
        .await
        .expect("launch");
    tokio::time::sleep(Duration::from_millis(5)).await;

    // The hanging probe cannot settle on its own.
    assert!(!harness.quiesce(Duration::from_millis(50), true).await);
    // The kill pass cancelled it; settling is asynchronous but bounded.
    assert!(harness.quiesce(Duration::from_secs(1), false).await);
    assert_eq!(harness.registry().running_count(), 0);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn tasks_remain_queryable_after_completion() {
    let harness = ProbeHarness::builder()
        .transport(MockTransport::scripted(vec![head_ok(), Step::Complete]))
        .build()
        .expect("build harness");

    let results = harness
        .launch(ProbeRequest::get("http://localhost/done").name("done probe"), |_| {})
        .await
        .expect("launch");
    results.await_complete().await;

    let tasks = harness.registry().tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].description(), "done probe");
    assert_eq!(tasks[0].state(), TaskState::Done);
}
