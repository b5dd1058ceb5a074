use std::time::Duration;

use tokio_util::sync::CancellationToken;

use convergence::{
    error::{FaultKind, Operation},
    poll::Deadline,
    reconciler::{KindProfile, Reconciler},
    remote::{
        ApiError, RemoteApi,
        memory::{ConsistencyLag, InMemoryRemote, RemoteCall},
    },
    telemetry::ReconcileTelemetryEvent,
    types::RemoteObject,
};

use crate::support::{Harness, named};

#[tokio::test(start_paused = true)]
async fn given_object_never_appears_when_read_with_15s_deadline_then_fatal_timeout_at_deadline() {
    let harness = Harness::new(InMemoryRemote::new("role"), KindProfile::new("role"));
    let deadline = Deadline::after(Duration::from_secs(15));

    let err = harness
        .engine
        .read_with_retry("role-404", &deadline)
        .await
        .expect_err("read must give up");

    assert_eq!(err.kind, FaultKind::Timeout);
    assert!(!err.retryable);
    assert_eq!(err.cause_kind, Some(FaultKind::NotFoundTransient));
    assert_eq!(err.object_id.as_deref(), Some("role-404"));
    assert_eq!(err.operation, Some(Operation::Read));
    assert!(deadline.elapsed() >= Duration::from_secs(15));
    assert!(deadline.elapsed() < Duration::from_secs(16));
    assert!(harness.remote.calls(RemoteCall::Get) > 1);
}

#[tokio::test]
async fn given_cached_object_when_read_then_remote_is_not_called_again() {
    let remote = InMemoryRemote::new("role");
    remote.seed(RemoteObject::new("role-1", named("auditors")), false);
    let harness = Harness::new(remote, KindProfile::new("role"));
    let deadline = Deadline::after(Duration::from_secs(30));

    let first = harness
        .engine
        .read_with_retry("role-1", &deadline)
        .await
        .expect("read succeeds");
    let second = harness
        .engine
        .read_with_retry("role-1", &deadline)
        .await
        .expect("read succeeds");

    assert_eq!(first, second);
    assert_eq!(harness.remote.calls(RemoteCall::Get), 1);
}

#[tokio::test]
async fn given_object_being_deleted_when_presence_expected_then_read_fails_fatally() {
    let remote = InMemoryRemote::new("role").with_lag(ConsistencyLag {
        after_delete: 5,
        ..Default::default()
    });
    remote.seed(RemoteObject::new("role-1", named("auditors")), false);
    remote.delete("role-1").await.expect("delete accepted");
    let harness = Harness::new(remote, KindProfile::new("role"));

    let err = harness
        .engine
        .read_with_retry("role-1", &Deadline::after(Duration::from_secs(30)))
        .await
        .expect_err("deleting object is not retried");

    assert_eq!(err.kind, FaultKind::NotFoundTerminal);
    assert_eq!(harness.remote.calls(RemoteCall::Get), 1);
}

#[tokio::test]
async fn given_forbidden_response_when_read_then_remote_diagnostic_is_kept_verbatim() {
    let remote = InMemoryRemote::new("role");
    remote.fail_next(
        RemoteCall::Get,
        ApiError::new(403, "missing permission authorization:role:view")
            .with_correlation_id("c-1"),
    );
    let harness = Harness::new(remote, KindProfile::new("role"));

    let err = harness
        .engine
        .read_with_retry("role-1", &Deadline::after(Duration::from_secs(30)))
        .await
        .expect_err("forbidden is fatal");

    assert_eq!(err.kind, FaultKind::Forbidden);
    assert_eq!(err.remote_status, Some(403));
    let rendered = err.to_string();
    assert!(rendered.starts_with("read role-1: "));
    assert!(rendered.contains("missing permission authorization:role:view [correlation_id=c-1]"));
    assert_eq!(harness.remote.calls(RemoteCall::Get), 1);
}

#[tokio::test(start_paused = true)]
async fn given_transient_outage_when_read_then_it_is_absorbed() {
    let remote = InMemoryRemote::new("role");
    remote.seed(RemoteObject::new("role-1", named("auditors")), false);
    remote.fail_next(RemoteCall::Get, ApiError::new(503, "upstream unavailable"));
    remote.fail_next(RemoteCall::Get, ApiError::new(429, "slow down"));
    let harness = Harness::new(remote, KindProfile::new("role"));

    let object = harness
        .engine
        .read_with_retry("role-1", &Deadline::after(Duration::from_secs(30)))
        .await
        .expect("read converges");

    assert_eq!(object.label(), "auditors");
    assert_eq!(harness.remote.calls(RemoteCall::Get), 3);
}

#[tokio::test(start_paused = true)]
async fn given_caller_cancels_when_read_is_retrying_then_cancelled_not_timeout() {
    let harness = Harness::new(InMemoryRemote::new("role"), KindProfile::new("role"));
    let token = CancellationToken::new();
    let deadline = Deadline::after(Duration::from_secs(300)).with_cancellation(token.clone());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        token.cancel();
    });

    let err = harness
        .engine
        .read_with_retry("role-404", &deadline)
        .await
        .expect_err("cancelled");

    assert_eq!(err.kind, FaultKind::Cancelled);
    assert_eq!(err.cause_kind, Some(FaultKind::NotFoundTransient));
    assert!(deadline.elapsed() < Duration::from_secs(10));

    let events = harness.telemetry.events();
    assert!(matches!(
        events.last(),
        Some(ReconcileTelemetryEvent::OperationCancelled { .. })
    ));
    assert!(events.iter().any(|event| matches!(
        event,
        ReconcileTelemetryEvent::AttemptFailed {
            fault_kind: FaultKind::NotFoundTransient,
            retryable: true,
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn given_unbounded_deadline_when_read_is_retrying_then_only_cancellation_stops_it() {
    let harness = Harness::new(InMemoryRemote::new("role"), KindProfile::new("role"));
    let token = CancellationToken::new();
    let deadline = Deadline::after(Duration::MAX).with_cancellation(token.clone());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(120)).await;
        token.cancel();
    });

    let err = harness
        .engine
        .read_with_retry("missing", &deadline)
        .await
        .expect_err("cancelled");

    assert_eq!(err.kind, FaultKind::Cancelled);
    assert!(harness.remote.calls(RemoteCall::Get) > 1);
}
