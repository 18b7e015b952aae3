//! Run-wide report aggregation across completed probes.

mod common;

use common::{MockTransport, Step, chunk};
use http::StatusCode;
use rstest::rstest;
use wireprobe::{ProbeHarness, ProbeRequest};

fn harness() -> ProbeHarness {
    ProbeHarness::builder()
        .transport(MockTransport::scripted(vec![
            Step::Head {
                status: 200,
                headers: vec![("x-woog", "blah")],
            },
            chunk("Hello world!"),
            Step::Complete,
        ]))
        .build()
        .expect("build harness")
}

#[rstest]
#[tokio::test]
async fn summary_counts_statuses_and_names_offenders() {
    let harness = harness();

    harness
        .test(
            ProbeRequest::get("http://localhost/hello").name("clean"),
            |a| {
                a.status_equals(StatusCode::OK).body_equals("Hello world!");
            },
        )
        .await
        .expect("clean probe passes");

    let failing = harness
        .launch(
            ProbeRequest::get("http://localhost/hello").name("broken"),
            |a| {
                a.status_equals(StatusCode::NOT_FOUND);
            },
        )
        .await
        .expect("launch");
    failing.await_complete().await;

    let warned = harness
        .launch(
            ProbeRequest::get("http://localhost/hello").name("noisy"),
            |a| {
                a.status_equals(StatusCode::OK).warning(|a| {
                    a.body("body is empty", <[u8]>::is_empty);
                });
            },
        )
        .await
        .expect("launch");
    warned.await_complete().await;

    let summary = harness.report().summary();
    assert_eq!(summary.total_tests, 3);
    assert_eq!(summary.total_assertions, 5);
    assert_eq!(summary.successes, 3);
    assert_eq!(summary.failures, 2);
    assert_eq!(summary.internal_errors, 0);
    assert_eq!(summary.did_not_run, 0);
    assert!(summary.fatal_tests.contains("broken"));
    assert!(!summary.fatal_tests.contains("noisy"));
    assert!(summary.warned_tests.contains("noisy"));
    assert!(!summary.is_clean());
}

#[rstest]
#[tokio::test]
async fn records_carry_per_probe_detail() {
    let harness = harness();
    harness
        .test(
            ProbeRequest::get("http://localhost/hello").name("detailed"),
            |a| {
                a.status_equals(StatusCode::OK);
            },
        )
        .await
        .expect("passes");

    let records = harness.report().records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.name, "detailed");
    assert_eq!(record.method, http::Method::GET);
    assert_eq!(record.uri, "http://localhost/hello");
    assert_eq!(record.results.len(), 1);
}

#[rstest]
#[tokio::test]
async fn summary_renders_for_logging() {
    let harness = harness();
    let probe = harness
        .launch(ProbeRequest::get("http://localhost/hello").name("broken"), |a| {
            a.status_equals(StatusCode::IM_A_TEAPOT);
        })
        .await
        .expect("launch");
    probe.await_complete().await;

    let rendered = harness.report().summary().to_string();
    assert!(rendered.contains("1 test(s)"), "{rendered}");
    assert!(rendered.contains("fatal: broken"), "{rendered}");
}
