use std::time::Duration;
use tollgate::telemetry::{emit_best_effort, AdmissionEvent, LogSink};
use tollgate::{FailurePolicy, StoreError};

mod common;
use common::test_helpers::{capture_logs, logs};

#[tokio::test]
async fn log_sink_writes_structured_decisions() {
    let (buffer, _guard) = capture_logs();
    emit_best_effort(LogSink, AdmissionEvent::Admitted { key: "rate_limit:a".into(), remaining: 2.5 })
        .await;
    emit_best_effort(LogSink, AdmissionEvent::Rejected { key: "rate_limit:b".into(), remaining: 0.0 })
        .await;

    let output = logs(&buffer);
    assert!(output.contains("tollgate::telemetry"));
    assert!(output.contains("key=rate_limit:a allowed=true remaining=2.5"));
    assert!(output.contains("key=rate_limit:b allowed=false remaining=0"));
}

#[tokio::test]
async fn log_sink_reports_degraded_decisions_as_warnings() {
    let (buffer, _guard) = capture_logs();
    let event = AdmissionEvent::BackendFailure {
        key: "rate_limit:c".into(),
        error: StoreError::Timeout(Duration::from_millis(250)),
        policy: FailurePolicy::FailOpen,
    };
    emit_best_effort(LogSink, event).await;

    let output = logs(&buffer);
    assert!(output.contains("WARN"));
    assert!(output.contains("key=rate_limit:c allowed=true policy=FailOpen"));
}
