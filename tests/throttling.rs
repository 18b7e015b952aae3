//! Concurrency throttling: the permit pool bounds simultaneous in-flight
//! probes and every termination path releases exactly one permit.

mod common;

use std::{sync::Arc, time::Duration};

use common::{MockTransport, Step, chunk, head_ok, init_tracing};
use rstest::rstest;
use wireprobe::{ProbeHarness, ProbeRequest, TaskState, Throttle, TransportError};

fn slow_transport() -> Arc<MockTransport> {
    MockTransport::scripted(vec![
        Step::Wait(Duration::from_millis(100)),
        head_ok(),
        chunk("ok"),
        Step::Complete,
    ])
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn permit_pool_bounds_running_tasks() {
    init_tracing();
    let harness = ProbeHarness::builder()
        .transport(slow_transport())
        .throttle(2)
        .build()
        .expect("build harness");

    let mut launches = Vec::new();
    for index in 0..5 {
        let harness = harness.clone();
        launches.push(tokio::spawn(async move {
            harness
                .launch(
                    ProbeRequest::get(format!("http://localhost/slow/{index}")),
                    |_| {},
                )
                .await
                .expect("launch")
        }));
    }

    let registry = harness.registry();
    // Sample while the batch drains; a task only registers once it holds a
    // permit, so the running count is the in-flight count.
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(registry.running_count() <= 2, "throttle bound exceeded");
    }

    for launch in launches {
        let results = launch.await.expect("join launch");
        results.await_complete().await;
        assert_eq!(results.state(), TaskState::Done);
    }
    assert_eq!(registry.tasks().len(), 5);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn unthrottled_probes_run_concurrently() {
    let harness = ProbeHarness::builder()
        .transport(slow_transport())
        .build()
        .expect("build harness");

    for index in 0..5 {
        harness
            .launch(
                ProbeRequest::get(format!("http://localhost/slow/{index}")),
                |_| {},
            )
            .await
            .expect("launch");
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(harness.registry().running_count(), 5);
    assert!(harness.quiesce(Duration::from_secs(5), false).await);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn shared_pool_spans_harnesses() {
    let pool = Arc::new(Throttle::new(1));
    let first = ProbeHarness::builder()
        .transport(slow_transport())
        .shared_throttle(Arc::clone(&pool))
        .build()
        .expect("build first harness");
    let second = ProbeHarness::builder()
        .transport(slow_transport())
        .shared_throttle(Arc::clone(&pool))
        .build()
        .expect("build second harness");

    let held = first
        .launch(ProbeRequest::get("http://localhost/slow/a"), |_| {})
        .await
        .expect("first launch");

    let queued = {
        let second = second.clone();
        tokio::spawn(async move {
            second
                .launch(ProbeRequest::get("http://localhost/slow/b"), |_| {})
                .await
                .expect("second launch")
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    // The second harness is still queued on the shared pool.
    assert_eq!(second.registry().running_count(), 0);

    held.await_complete().await;
    let results = queued.await.expect("join queued launch");
    results.await_complete().await;
    assert_eq!(results.state(), TaskState::Done);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn error_path_releases_the_permit_exactly_once() {
    let transport = MockTransport::scripted(vec![
        head_ok(),
        Step::Fail(TransportError::Io("reset".into())),
    ]);
    let harness = ProbeHarness::builder()
        .transport(transport)
        .throttle(1)
        .build()
        .expect("build harness");

    for index in 0..3 {
        let results = harness
            .launch(
                ProbeRequest::get(format!("http://localhost/flaky/{index}")),
                |_| {},
            )
            .await
            .expect("launch");
        results.await_complete().await;
        assert_eq!(results.state(), TaskState::Errored);
    }
    // Three sequential launches through a single permit: each failure
    // released its slot, or the later acquires would have hung.
    assert_eq!(harness.registry().tasks().len(), 3);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn timeout_path_releases_the_permit() {
    let transport = MockTransport::scripted(vec![head_ok(), Step::Hang]);
    let harness = ProbeHarness::builder()
        .transport(transport)
        .throttle(1)
        .watchdog_interval(Duration::from_millis(20))
        .build()
        .expect("build harness");

    let timed_out = harness
        .launch(
            ProbeRequest::get("http://localhost/hang").finish_timeout(Duration::from_millis(50)),
            |a| {
                a.timed_out(true);
            },
        )
        .await
        .expect("first launch");
    timed_out.await_complete().await;
    assert_eq!(timed_out.state(), TaskState::Cancelled);

    // The permit freed by the timeout path admits the next probe.
    let next = harness
        .launch(
            ProbeRequest::get("http://localhost/hang").finish_timeout(Duration::from_millis(50)),
            |a| {
                a.timed_out(true);
            },
        )
        .await
        .expect("second launch");
    next.await_complete().await;
    assert_eq!(next.state(), TaskState::Cancelled);
}
