use std::time::Duration;

use serde_json::json;

use convergence::{
    error::{FaultKind, Operation},
    kinds::{ManagedObject, Role},
    poll::Deadline,
    reconciler::{DesiredState, KindProfile, Reconciler},
    remote::{
        ApiError,
        memory::{ConsistencyLag, InMemoryRemote, RemoteCall},
    },
    types::{Lifecycle, RemoteObject},
};

use crate::support::{Harness, bag, named};

fn auditors() -> DesiredState {
    DesiredState::new("auditors", named("auditors"))
}

#[tokio::test(start_paused = true)]
async fn given_delete_visible_after_lag_when_delete_then_absence_confirmed_and_cache_evicted() {
    let remote = InMemoryRemote::new("role").with_lag(ConsistencyLag {
        after_delete: 2,
        ..Default::default()
    });
    remote.seed(RemoteObject::new("role-1", named("auditors")), false);
    let harness = Harness::new(remote, KindProfile::new("role"));
    let deadline = Deadline::after(Duration::from_secs(60));

    harness
        .engine
        .read_with_retry("role-1", &deadline)
        .await
        .expect("read succeeds");
    assert!(harness.cached("role-1"));

    harness
        .engine
        .delete_then_confirm_absence("role-1", &auditors(), &deadline)
        .await
        .expect("delete confirmed");

    assert!(!harness.cached("role-1"));
    assert!(harness.remote.snapshot("role-1").is_none());
    // two lagging reads still see the object, the third observes not-found
    assert_eq!(harness.remote.calls(RemoteCall::Get), 1 + 3);
}

#[tokio::test(start_paused = true)]
async fn given_default_role_when_delete_then_defaults_restored_and_object_stays_present() {
    let remote = InMemoryRemote::new("role");
    remote.seed(
        RemoteObject::new("default-employee", named("employee")).with_version(1),
        true,
    );
    remote.overwrite(
        "default-employee",
        bag(json!({ "name": "employee", "description": "customized" })),
    );
    let harness = Harness::new(remote, KindProfile::new("role"));
    let desired = Role::new("employee")
        .with_default_role_id("default-employee")
        .desired_state()
        .expect("desired state");
    let deadline = Deadline::after(Duration::from_secs(60));

    harness
        .engine
        .delete_then_confirm_absence("default-employee", &desired, &deadline)
        .await
        .expect("defaults restored");

    let remaining = harness
        .remote
        .snapshot("default-employee")
        .expect("default role still exists");
    assert_eq!(remaining.lifecycle, Lifecycle::Present);
    assert!(!remaining.attributes.contains_key("description"));
    assert_eq!(harness.remote.calls(RemoteCall::Delete), 0);
    assert_eq!(harness.remote.calls(RemoteCall::RestoreDefaults), 1);

    let observed = harness
        .engine
        .read_with_retry("default-employee", &deadline)
        .await
        .expect("still readable");
    assert_eq!(observed.lifecycle, Lifecycle::Present);
}

#[tokio::test]
async fn given_object_already_gone_when_delete_then_success() {
    let harness = Harness::new(InMemoryRemote::new("role"), KindProfile::new("role"));

    harness
        .engine
        .delete_then_confirm_absence("role-9", &auditors(), &Deadline::after(Duration::from_secs(60)))
        .await
        .expect("absent object counts as deleted");

    assert_eq!(harness.remote.calls(RemoteCall::Delete), 1);
    assert_eq!(harness.remote.calls(RemoteCall::Get), 1);
}

#[tokio::test(start_paused = true)]
async fn given_object_lingers_when_deadline_passes_then_still_exists_timeout() {
    let remote = InMemoryRemote::new("role").with_lag(ConsistencyLag {
        after_delete: 10_000,
        ..Default::default()
    });
    remote.seed(RemoteObject::new("role-1", named("auditors")), false);
    let harness = Harness::new(remote, KindProfile::new("role"));
    let deadline = Deadline::after(Duration::from_secs(60));

    let err = harness
        .engine
        .delete_then_confirm_absence("role-1", &auditors(), &deadline)
        .await
        .expect_err("object never disappears");

    assert_eq!(err.kind, FaultKind::Timeout);
    assert_eq!(err.operation, Some(Operation::Delete));
    assert!(err.message.contains("role role-1 still exists"));
    assert!(deadline.elapsed() >= Duration::from_secs(60));
    assert!(
        err.to_string()
            .starts_with("delete 'auditors' (role-1): delete did not converge within 60s")
    );
}

#[tokio::test(start_paused = true)]
async fn given_remote_down_while_confirming_delete_then_timeout_keeps_remote_text() {
    let remote = InMemoryRemote::new("role");
    remote.seed(RemoteObject::new("role-1", named("auditors")), false);
    for _ in 0..100 {
        remote.fail_next(RemoteCall::Get, ApiError::new(503, "upstream unavailable"));
    }
    let harness = Harness::new(remote, KindProfile::new("role"));
    let deadline = Deadline::after(Duration::from_secs(60));

    let err = harness
        .engine
        .delete_then_confirm_absence("role-1", &auditors(), &deadline)
        .await
        .expect_err("absence cannot be confirmed");

    assert_eq!(err.kind, FaultKind::Timeout);
    assert_eq!(err.cause_kind, Some(FaultKind::RemoteUnavailable));
    let rendered = err.to_string();
    assert!(rendered.starts_with("delete 'auditors' (role-1): "));
    assert!(rendered.contains("remote status 503: upstream unavailable"));
}
