use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;

use crate::{
    remote::{ApiError, CreateAck, Page, RemoteApi},
    types::{AttributeBag, Lifecycle, ObjectId, RemoteObject},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteCall {
    List,
    Get,
    Create,
    Update,
    Delete,
    RestoreDefaults,
}

/// How many reads observe the previous state after each kind of write.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsistencyLag {
    pub after_create: u32,
    pub after_update: u32,
    pub after_delete: u32,
}

#[derive(Debug, Clone)]
struct StoredObject {
    current: RemoteObject,
    stale_view: Option<RemoteObject>,
    stale_reads_left: u32,
    deleted: bool,
    defaults: Option<AttributeBag>,
}

impl StoredObject {
    fn observe(&mut self) -> Option<RemoteObject> {
        if self.stale_reads_left > 0 {
            self.stale_reads_left -= 1;
            let view = self.stale_view.clone();
            if self.stale_reads_left == 0 {
                self.stale_view = None;
            }
            return view;
        }
        if self.deleted {
            return None;
        }
        Some(self.current.clone())
    }
}

#[derive(Default)]
struct MemoryState {
    objects: BTreeMap<ObjectId, StoredObject>,
    injected: HashMap<RemoteCall, VecDeque<ApiError>>,
    calls: HashMap<RemoteCall, u64>,
}

/// Eventually-consistent control plane held in memory. Reads lag behind writes
/// by a configurable number of calls, which is enough to drive every retry
/// path of the engine without a network.
pub struct InMemoryRemote {
    kind: String,
    lag: ConsistencyLag,
    empty_create_ack: bool,
    id_attribute: Option<String>,
    next_id: AtomicU64,
    state: Mutex<MemoryState>,
}

impl InMemoryRemote {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            lag: ConsistencyLag::default(),
            empty_create_ack: false,
            id_attribute: None,
            next_id: AtomicU64::new(1),
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn with_lag(mut self, lag: ConsistencyLag) -> Self {
        self.lag = lag;
        self
    }

    /// Create returns an empty body and the stored id is taken from `attribute`.
    pub fn with_empty_create_ack(mut self, attribute: impl Into<String>) -> Self {
        self.empty_create_ack = true;
        self.id_attribute = Some(attribute.into());
        self
    }

    /// Seeds an object that is immediately visible. Protected objects carry the
    /// attribute set that `restore_defaults` brings them back to.
    pub fn seed(&self, object: RemoteObject, protected: bool) {
        let defaults = protected.then(|| object.attributes.clone());
        let mut guard = self.state.lock().expect("lock poisoned");
        guard.objects.insert(
            object.id.clone(),
            StoredObject {
                current: object,
                stale_view: None,
                stale_reads_left: 0,
                deleted: false,
                defaults,
            },
        );
    }

    /// Queues an error returned by the next matching call, ahead of normal behavior.
    pub fn fail_next(&self, call: RemoteCall, error: ApiError) {
        let mut guard = self.state.lock().expect("lock poisoned");
        guard.injected.entry(call).or_default().push_back(error);
    }

    /// Replaces an object's attributes without going through `update`,
    /// simulating a write that landed wrong or an out-of-band change.
    pub fn overwrite(&self, id: &str, attributes: AttributeBag) {
        let mut guard = self.state.lock().expect("lock poisoned");
        if let Some(stored) = guard.objects.get_mut(id) {
            stored.current.attributes = attributes;
        }
    }

    pub fn calls(&self, call: RemoteCall) -> u64 {
        let guard = self.state.lock().expect("lock poisoned");
        guard.calls.get(&call).copied().unwrap_or(0)
    }

    /// Current authoritative state, ignoring read lag.
    pub fn snapshot(&self, id: &str) -> Option<RemoteObject> {
        let guard = self.state.lock().expect("lock poisoned");
        guard
            .objects
            .get(id)
            .filter(|stored| !stored.deleted)
            .map(|stored| stored.current.clone())
    }

    fn begin(&self, call: RemoteCall) -> Result<std::sync::MutexGuard<'_, MemoryState>, ApiError> {
        let mut guard = self.state.lock().expect("lock poisoned");
        *guard.calls.entry(call).or_insert(0) += 1;
        if let Some(error) = guard.injected.get_mut(&call).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        Ok(guard)
    }

    fn allocate_id(&self, attributes: &AttributeBag) -> ObjectId {
        if let Some(id) = self
            .id_attribute
            .as_ref()
            .and_then(|attribute| attributes.get(attribute))
            .and_then(|value| value.as_str())
        {
            return id.to_string();
        }
        let sequence = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.kind, sequence)
    }
}

#[async_trait]
impl RemoteApi for InMemoryRemote {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn list_page(&self, page_number: u32, page_size: u32) -> Result<Page, ApiError> {
        let mut guard = self.begin(RemoteCall::List)?;
        let page_size = page_size.max(1) as usize;
        // A listing counts as one observation of every object.
        let visible: Vec<RemoteObject> = guard
            .objects
            .values_mut()
            .filter_map(StoredObject::observe)
            .filter(|object| object.lifecycle != Lifecycle::Deleting)
            .collect();
        let page_count = visible.len().div_ceil(page_size) as u32;
        let start = (page_number.max(1) as usize - 1) * page_size;
        let entities = visible.into_iter().skip(start).take(page_size).collect();
        Ok(Page {
            entities,
            page_count,
        })
    }

    async fn get(&self, id: &str) -> Result<RemoteObject, ApiError> {
        let mut guard = self.begin(RemoteCall::Get)?;
        let observed = guard.objects.get_mut(id).and_then(StoredObject::observe);
        match observed {
            Some(object) => Ok(object),
            None => {
                if guard
                    .objects
                    .get(id)
                    .is_some_and(|stored| stored.deleted && stored.stale_reads_left == 0)
                {
                    guard.objects.remove(id);
                }
                Err(ApiError::not_found(format!("{} {} not found", self.kind, id)))
            }
        }
    }

    async fn create(&self, attributes: &AttributeBag) -> Result<CreateAck, ApiError> {
        let mut guard = self.begin(RemoteCall::Create)?;
        let id = self.allocate_id(attributes);
        if guard.objects.get(&id).is_some_and(|stored| !stored.deleted) {
            return Err(ApiError::conflict(format!("{} {} already exists", self.kind, id)));
        }
        let object = RemoteObject::new(id.clone(), attributes.clone()).with_version(1);
        guard.objects.insert(
            id.clone(),
            StoredObject {
                current: object.clone(),
                stale_view: None,
                stale_reads_left: self.lag.after_create,
                deleted: false,
                defaults: None,
            },
        );
        if self.empty_create_ack {
            return Ok(CreateAck::empty());
        }
        Ok(CreateAck::with_object(object))
    }

    async fn update(&self, id: &str, attributes: &AttributeBag) -> Result<RemoteObject, ApiError> {
        let mut guard = self.begin(RemoteCall::Update)?;
        let lag = self.lag.after_update;
        let Some(stored) = guard.objects.get_mut(id).filter(|stored| !stored.deleted) else {
            return Err(ApiError::not_found(format!("{} {} not found", self.kind, id)));
        };
        let previous = stored.current.clone();
        stored.current.attributes = attributes.clone();
        stored.current.version = Some(previous.version.unwrap_or(0) + 1);
        if lag > 0 {
            stored.stale_view = Some(previous);
            stored.stale_reads_left = lag;
        }
        Ok(stored.current.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        let mut guard = self.begin(RemoteCall::Delete)?;
        let lag = self.lag.after_delete;
        let Some(stored) = guard.objects.get_mut(id).filter(|stored| !stored.deleted) else {
            return Err(ApiError::not_found(format!("{} {} not found", self.kind, id)));
        };
        if stored.defaults.is_some() {
            return Err(ApiError::new(
                400,
                format!("{} {} is a default object and cannot be deleted", self.kind, id),
            ));
        }
        stored.deleted = true;
        stored.stale_view = Some(stored.current.clone().with_lifecycle(Lifecycle::Deleting));
        stored.stale_reads_left = lag;
        Ok(())
    }

    async fn restore_defaults(&self, id: &str) -> Result<(), ApiError> {
        let mut guard = self.begin(RemoteCall::RestoreDefaults)?;
        let Some(stored) = guard.objects.get_mut(id).filter(|stored| !stored.deleted) else {
            return Err(ApiError::not_found(format!("{} {} not found", self.kind, id)));
        };
        let Some(defaults) = stored.defaults.clone() else {
            return Err(ApiError::new(
                400,
                format!("{} {} has no default configuration", self.kind, id),
            ));
        };
        stored.current.attributes = defaults;
        stored.current.version = Some(stored.current.version.unwrap_or(0) + 1);
        stored.stale_view = None;
        stored.stale_reads_left = 0;
        Ok(())
    }
}
