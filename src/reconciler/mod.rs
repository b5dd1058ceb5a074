use std::sync::Arc;

use async_trait::async_trait;
use tracing::Span;

use crate::{
    cache::{CacheConfig, ExportMap, ObjectCache, ShardedObjectCache},
    config::Config,
    error::Fault,
    poll::Deadline,
    policy::PolicyValidator,
    remote::RemoteApi,
    telemetry::{NoopTelemetrySink, TelemetrySink},
    types::{ObjectId, RemoteObject},
};

pub mod engine;
pub mod types;

pub use engine::ReconcileEngine;
pub use types::{DesiredState, IdAssignment, KindProfile, PollingConfig};

/// Drives one object kind to its desired state against an eventually
/// consistent remote. Every mutating call only reports success after the
/// result has been observed through a read.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn create_then_verify(
        &self,
        desired: &DesiredState,
        deadline: &Deadline,
    ) -> Result<RemoteObject, Fault>;

    async fn read_with_retry(&self, id: &str, deadline: &Deadline) -> Result<RemoteObject, Fault>;

    async fn update_then_verify(
        &self,
        id: &str,
        desired: &DesiredState,
        deadline: &Deadline,
    ) -> Result<RemoteObject, Fault>;

    /// Protected objects are restored to their defaults and stay present.
    async fn delete_then_confirm_absence(
        &self,
        id: &str,
        desired: &DesiredState,
        deadline: &Deadline,
    ) -> Result<(), Fault>;

    async fn lookup_id_by_name(&self, name: &str, deadline: &Deadline) -> Result<ObjectId, Fault>;

    async fn enumerate(&self) -> Result<ExportMap, Fault>;
}

/// Everything one engine needs for a single client configuration.
#[derive(Clone)]
pub struct ReconcileContext {
    pub remote: Arc<dyn RemoteApi>,
    pub cache: Arc<dyn ObjectCache>,
    pub validator: Option<Arc<dyn PolicyValidator>>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub profile: KindProfile,
    pub page_size: u32,
    /// Parent of every reconcile span; `Span::none()` keeps the caller's span.
    pub run_span: Span,
}

impl ReconcileContext {
    pub fn new(remote: Arc<dyn RemoteApi>, profile: KindProfile) -> Self {
        let defaults = CacheConfig::default();
        let cache = Arc::new(ShardedObjectCache::from_config(&defaults));
        Self::assemble(remote, profile, cache, defaults.page_size)
    }

    /// Context for `remote`'s kind with the profile, cache shards and page
    /// size taken from `config`.
    pub fn from_config(config: &Config, remote: Arc<dyn RemoteApi>) -> Self {
        let profile = config.kind_profile(remote.kind());
        let cache = Arc::new(ShardedObjectCache::from_config(&config.cache));
        Self::assemble(remote, profile, cache, config.cache.page_size)
    }

    fn assemble(
        remote: Arc<dyn RemoteApi>,
        profile: KindProfile,
        cache: Arc<dyn ObjectCache>,
        page_size: u32,
    ) -> Self {
        Self {
            remote,
            cache,
            validator: None,
            telemetry: Arc::new(NoopTelemetrySink),
            profile,
            page_size: page_size.max(1),
            run_span: Span::none(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ObjectCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn PolicyValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_run_span(mut self, run_span: Span) -> Self {
        self.run_span = run_span;
        self
    }
}
