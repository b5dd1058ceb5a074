use std::{sync::Arc, time::Duration};

use serde_json::json;

use convergence::{
    cache::{ObjectCache, ShardedObjectCache, populate_from_listing},
    poll::Deadline,
    reconciler::{DesiredState, KindProfile, ReconcileContext, ReconcileEngine, Reconciler},
    remote::{
        ApiError,
        memory::{InMemoryRemote, RemoteCall},
    },
    types::{AttributeBag, Lifecycle, RemoteObject},
};

fn named(name: &str) -> AttributeBag {
    let mut attributes = AttributeBag::new();
    attributes.insert("name".to_string(), json!(name));
    attributes
}

#[tokio::test]
async fn given_listing_when_populating_then_single_reads_are_served_from_cache() {
    let remote = InMemoryRemote::new("schedule");
    for index in 1..=7 {
        remote.seed(
            RemoteObject::new(format!("schedule-{index}"), named(&format!("shift {index}"))),
            false,
        );
    }
    let cache = ShardedObjectCache::new(4);

    let exported = populate_from_listing(&remote, &cache, 3)
        .await
        .expect("listing succeeds");

    assert_eq!(exported.len(), 7);
    assert_eq!(cache.len(), 7);
    assert_eq!(remote.calls(RemoteCall::List), 3);
    assert_eq!(
        cache.get("schedule-5").map(|object| object.label().to_string()),
        Some("shift 5".to_string())
    );
}

#[tokio::test]
async fn given_listing_failure_when_populating_then_fault_names_the_kind() {
    let remote = InMemoryRemote::new("schedule");
    remote.fail_next(RemoteCall::List, ApiError::new(500, "listing exploded"));
    let cache = ShardedObjectCache::new(4);

    let err = populate_from_listing(&remote, &cache, 100)
        .await
        .expect_err("listing fails");

    assert_eq!(err.object_name.as_deref(), Some("schedule"));
    assert_eq!(err.remote_diagnostic.as_deref(), Some("listing exploded"));
    assert!(cache.is_empty());
}

#[test]
fn given_absent_snapshot_when_setting_then_entry_is_evicted() {
    let cache = ShardedObjectCache::new(2);
    cache.set("schedule-1", RemoteObject::new("schedule-1", named("shift")));
    cache.set(
        "schedule-1",
        RemoteObject::new("schedule-1", named("shift")).with_lifecycle(Lifecycle::Absent),
    );
    assert!(cache.get("schedule-1").is_none());
}

#[tokio::test(start_paused = true)]
async fn given_confirmed_delete_when_reading_cache_then_entry_misses() {
    let remote = Arc::new(InMemoryRemote::new("schedule"));
    remote.seed(RemoteObject::new("schedule-1", named("shift")), false);
    let cache = Arc::new(ShardedObjectCache::new(4));
    let engine = ReconcileEngine::new(
        ReconcileContext::new(remote.clone(), KindProfile::new("schedule"))
            .with_cache(cache.clone()),
    );

    engine.enumerate().await.expect("enumeration succeeds");
    assert!(cache.get("schedule-1").is_some());

    engine
        .delete_then_confirm_absence(
            "schedule-1",
            &DesiredState::new("shift", named("shift")),
            &Deadline::after(Duration::from_secs(60)),
        )
        .await
        .expect("delete confirmed");

    assert!(cache.get("schedule-1").is_none());
}
