use std::{
    collections::{HashMap, hash_map::DefaultHasher},
    hash::{Hash, Hasher},
    sync::RwLock,
};

use serde::{Deserialize, Serialize};

use crate::types::{Lifecycle, ObjectId, RemoteObject};

pub mod listing;

pub use listing::{ExportEntry, ExportMap, content_hash, list_all, populate_from_listing};

/// Process-wide snapshot store keyed by object id. Entries live until they are
/// explicitly deleted; there is no expiry.
pub trait ObjectCache: Send + Sync {
    fn get(&self, id: &str) -> Option<RemoteObject>;

    /// Stores a snapshot. A snapshot whose lifecycle is `Absent` evicts the key.
    fn set(&self, id: &str, object: RemoteObject);

    fn delete(&self, id: &str) -> Option<RemoteObject>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_shards")]
    pub shards: usize,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shards: default_shards(),
            page_size: default_page_size(),
        }
    }
}

fn default_shards() -> usize {
    16
}

fn default_page_size() -> u32 {
    100
}

/// Cache split across independently locked shards. A key always lands on the
/// same shard, so writes to one key are serialized while unrelated keys rarely
/// contend.
pub struct ShardedObjectCache {
    shards: Vec<RwLock<HashMap<ObjectId, RemoteObject>>>,
}

impl ShardedObjectCache {
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        Self { shards }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.shards)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_index(&self, id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    fn shard(&self, id: &str) -> &RwLock<HashMap<ObjectId, RemoteObject>> {
        &self.shards[self.shard_index(id)]
    }
}

impl Default for ShardedObjectCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl ObjectCache for ShardedObjectCache {
    fn get(&self, id: &str) -> Option<RemoteObject> {
        self.shard(id)
            .read()
            .expect("lock poisoned")
            .get(id)
            .cloned()
    }

    fn set(&self, id: &str, object: RemoteObject) {
        let mut guard = self.shard(id).write().expect("lock poisoned");
        if object.lifecycle == Lifecycle::Absent {
            guard.remove(id);
            return;
        }
        guard.insert(id.to_string(), object);
    }

    fn delete(&self, id: &str) -> Option<RemoteObject> {
        self.shard(id).write().expect("lock poisoned").remove(id)
    }

    fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.read().expect("lock poisoned").len())
            .sum()
    }
}
