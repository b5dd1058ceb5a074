use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Fault;

pub type ObjectId = String;
pub type AttributeBag = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Creating,
    #[default]
    Present,
    Deleting,
    Absent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub id: ObjectId,
    #[serde(default)]
    pub attributes: AttributeBag,
    #[serde(default)]
    pub lifecycle: Lifecycle,
    #[serde(default)]
    pub version: Option<u64>,
}

impl RemoteObject {
    pub fn new(id: impl Into<ObjectId>, attributes: AttributeBag) -> Self {
        Self {
            id: id.into(),
            attributes,
            lifecycle: Lifecycle::Present,
            version: None,
        }
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Display label used by name lookups and exports: the `name` attribute when
    /// it is a string, otherwise the id.
    pub fn label(&self) -> &str {
        self.attributes
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(&self.id)
    }
}

/// Result of a single attempt against the remote, as judged by the poll guard.
/// A fatal cause keeps the remote diagnostic inside the fault.
#[derive(Debug, Clone)]
pub enum OperationOutcome<T = RemoteObject> {
    Success(T),
    RetryableError(Fault),
    FatalError(Fault),
}
