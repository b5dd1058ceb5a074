use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{Fault, validation_fault},
    poll::{BackoffConfig, Deadline},
    policy::PolicyRule,
    remote::CreateAck,
    types::{AttributeBag, ObjectId},
};

/// How an object gets its id when the create acknowledgement carries none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdAssignment {
    /// The remote must return the id; an empty acknowledgement is an error.
    #[default]
    Remote,
    /// The id is the value of a desired attribute (a parent entity's key).
    ParentKey { attribute: String },
}

impl IdAssignment {
    pub fn resolve(&self, ack: &CreateAck, desired: &AttributeBag) -> Result<ObjectId, Fault> {
        if let Some(id) = ack.assigned_id() {
            return Ok(id.to_string());
        }
        match self {
            IdAssignment::Remote => Err(validation_fault(
                "create was acknowledged without an identifier",
            )),
            IdAssignment::ParentKey { attribute } => desired
                .get(attribute)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    validation_fault(format!(
                        "create was acknowledged without an identifier and attribute '{attribute}' is not set"
                    ))
                }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_conflict_max_attempts")]
    pub conflict_max_attempts: u32,
    #[serde(default = "default_conflict_step_ms")]
    pub conflict_step_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            conflict_max_attempts: default_conflict_max_attempts(),
            conflict_step_ms: default_conflict_step_ms(),
        }
    }
}

impl PollingConfig {
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            backoff_base_ms: self.backoff_base_ms,
            backoff_max_ms: self.backoff_max_ms,
        }
    }

    /// Linear wait before re-issuing an operation that hit a version conflict.
    pub fn conflict_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.conflict_step_ms.saturating_mul(u64::from(attempt)))
    }
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    10_000
}

fn default_conflict_max_attempts() -> u32 {
    10
}

fn default_conflict_step_ms() -> u64 {
    500
}

/// Per-kind tuning. Deadlines are defaults for callers building a `Deadline`;
/// the engine itself only honours the deadline it is handed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindProfile {
    #[serde(default)]
    pub kind: String,
    #[serde(default = "default_read_deadline_ms")]
    pub read_deadline_ms: u64,
    #[serde(default = "default_lookup_deadline_ms")]
    pub lookup_deadline_ms: u64,
    #[serde(default = "default_delete_deadline_ms")]
    pub delete_deadline_ms: u64,
    #[serde(default)]
    pub id_assignment: IdAssignment,
    /// Attributes the remote applies asynchronously; skipped by verification.
    #[serde(default)]
    pub settles_asynchronously: Vec<String>,
    #[serde(default)]
    pub polling: Option<PollingConfig>,
}

impl KindProfile {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            read_deadline_ms: default_read_deadline_ms(),
            lookup_deadline_ms: default_lookup_deadline_ms(),
            delete_deadline_ms: default_delete_deadline_ms(),
            id_assignment: IdAssignment::default(),
            settles_asynchronously: Vec::new(),
            polling: None,
        }
    }

    pub fn with_id_assignment(mut self, id_assignment: IdAssignment) -> Self {
        self.id_assignment = id_assignment;
        self
    }

    pub fn with_settles_asynchronously<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settles_asynchronously = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = Some(polling);
        self
    }

    pub fn polling(&self) -> PollingConfig {
        self.polling.clone().unwrap_or_default()
    }

    pub fn read_deadline(&self) -> Deadline {
        Deadline::after(Duration::from_millis(self.read_deadline_ms))
    }

    pub fn lookup_deadline(&self) -> Deadline {
        Deadline::after(Duration::from_millis(self.lookup_deadline_ms))
    }

    pub fn delete_deadline(&self) -> Deadline {
        Deadline::after(Duration::from_millis(self.delete_deadline_ms))
    }
}

fn default_read_deadline_ms() -> u64 {
    300_000
}

fn default_lookup_deadline_ms() -> u64 {
    15_000
}

fn default_delete_deadline_ms() -> u64 {
    60_000
}

/// What the caller wants the remote object to look like.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DesiredState {
    pub name: String,
    pub attributes: AttributeBag,
    pub policy_rules: Vec<PolicyRule>,
    /// Set for objects that exist out of the box and can only be reconfigured
    /// or restored, never created or deleted.
    pub protected_id: Option<ObjectId>,
}

impl DesiredState {
    pub fn new(name: impl Into<String>, attributes: AttributeBag) -> Self {
        Self {
            name: name.into(),
            attributes,
            policy_rules: Vec::new(),
            protected_id: None,
        }
    }

    pub fn with_policy_rules(mut self, policy_rules: Vec<PolicyRule>) -> Self {
        self.policy_rules = policy_rules;
        self
    }

    pub fn with_protected_id(mut self, protected_id: impl Into<ObjectId>) -> Self {
        self.protected_id = Some(protected_id.into());
        self
    }

    pub fn is_protected(&self) -> bool {
        self.protected_id.is_some()
    }
}
