use std::sync::Arc;

use serde_json::json;

use convergence::{
    cache::{ObjectCache, ShardedObjectCache},
    types::{AttributeBag, RemoteObject},
};

fn snapshot(id: &str, version: u64) -> RemoteObject {
    let mut attributes = AttributeBag::new();
    attributes.insert("name".to_string(), json!(format!("object {id}")));
    RemoteObject::new(id, attributes).with_version(version)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_parallel_flows_on_disjoint_keys_when_writing_then_every_entry_lands() {
    let cache = Arc::new(ShardedObjectCache::new(8));
    let mut handles = Vec::new();
    for flow in 0..16 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            for index in 0..50 {
                let id = format!("flow-{flow}-{index}");
                cache.set(&id, snapshot(&id, 1));
                assert!(cache.get(&id).is_some());
            }
        }));
    }
    for handle in handles {
        handle.await.expect("flow should not panic");
    }

    assert_eq!(cache.len(), 16 * 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_parallel_writers_on_one_key_when_writing_then_last_write_is_a_whole_snapshot() {
    let cache = Arc::new(ShardedObjectCache::new(8));
    let mut handles = Vec::new();
    for writer in 1..=8_u64 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            for round in 0..100_u64 {
                cache.set("shared", snapshot("shared", writer * 1_000 + round));
                let observed = cache.get("shared").expect("key stays cached");
                assert_eq!(observed.id, "shared");
                assert!(observed.version.is_some());
            }
        }));
    }
    for handle in handles {
        handle.await.expect("writer should not panic");
    }

    let last = cache.get("shared").expect("key stays cached");
    let version = last.version.expect("version set");
    assert!((1_000..9_000).contains(&version));
    assert_eq!(last.label(), "object shared");
    assert_eq!(cache.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_concurrent_deletes_when_racing_then_only_one_removes_the_entry() {
    let cache = Arc::new(ShardedObjectCache::new(8));
    cache.set("victim", snapshot("victim", 1));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move { cache.delete("victim").is_some() }));
    }
    let mut removed = 0;
    for handle in handles {
        if handle.await.expect("delete should not panic") {
            removed += 1;
        }
    }

    assert_eq!(removed, 1);
    assert!(cache.get("victim").is_none());
}
