use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use convergence::{
    cache::{ObjectCache, ShardedObjectCache},
    reconciler::{KindProfile, ReconcileContext, ReconcileEngine},
    remote::memory::InMemoryRemote,
    telemetry::{ReconcileTelemetryEvent, TelemetrySink},
    types::AttributeBag,
};

pub fn bag(value: Value) -> AttributeBag {
    serde_json::from_value(value).expect("object literal")
}

pub fn named(name: &str) -> AttributeBag {
    bag(json!({ "name": name }))
}

#[derive(Default)]
pub struct RecordingTelemetrySink {
    events: Mutex<Vec<ReconcileTelemetryEvent>>,
}

impl RecordingTelemetrySink {
    pub fn events(&self) -> Vec<ReconcileTelemetryEvent> {
        self.events.lock().expect("lock poisoned").clone()
    }
}

impl TelemetrySink for RecordingTelemetrySink {
    fn on_event(&self, event: ReconcileTelemetryEvent) {
        self.events.lock().expect("lock poisoned").push(event);
    }
}

pub struct Harness {
    pub remote: Arc<InMemoryRemote>,
    pub cache: Arc<ShardedObjectCache>,
    pub telemetry: Arc<RecordingTelemetrySink>,
    pub engine: ReconcileEngine,
}

impl Harness {
    pub fn new(remote: InMemoryRemote, profile: KindProfile) -> Self {
        Self::with_context(remote, profile, |ctx| ctx)
    }

    pub fn with_context(
        remote: InMemoryRemote,
        profile: KindProfile,
        customize: impl FnOnce(ReconcileContext) -> ReconcileContext,
    ) -> Self {
        let remote = Arc::new(remote);
        let cache = Arc::new(ShardedObjectCache::new(4));
        let telemetry = Arc::new(RecordingTelemetrySink::default());
        let ctx = ReconcileContext::new(remote.clone(), profile)
            .with_cache(cache.clone())
            .with_telemetry(telemetry.clone());
        let engine = ReconcileEngine::new(customize(ctx));
        Self {
            remote,
            cache,
            telemetry,
            engine,
        }
    }

    pub fn cached(&self, id: &str) -> bool {
        self.cache.get(id).is_some()
    }
}
