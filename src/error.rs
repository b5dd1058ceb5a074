use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    NotFoundTransient,
    NotFoundTerminal,
    VersionConflict,
    RemoteUnavailable,
    Validation,
    PermissionPolicy,
    Consistency,
    Forbidden,
    Remote,
    Timeout,
    Cancelled,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    RestoreDefaults,
    LookupByName,
    Enumerate,
    ValidatePolicy,
    Verify,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::RestoreDefaults => "restore_defaults",
            Operation::LookupByName => "lookup_by_name",
            Operation::Enumerate => "enumerate",
            Operation::ValidatePolicy => "validate_policy",
            Operation::Verify => "verify",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyContext {
    pub domain: String,
    pub entity_name: Option<String>,
    pub action: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMismatch {
    pub field: String,
    pub expected: Value,
    pub actual: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
    pub retryable: bool,
    pub object_id: Option<ObjectId>,
    pub object_name: Option<String>,
    pub operation: Option<Operation>,
    pub remote_status: Option<u16>,
    pub remote_diagnostic: Option<String>,
    /// Kind of the last retryable cause when a deadline or cancellation ended the loop.
    pub cause_kind: Option<FaultKind>,
    pub policy: Option<PolicyContext>,
    pub mismatches: Vec<FieldMismatch>,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: matches!(
                kind,
                FaultKind::NotFoundTransient
                    | FaultKind::VersionConflict
                    | FaultKind::RemoteUnavailable
            ),
            object_id: None,
            object_name: None,
            operation: None,
            remote_status: None,
            remote_diagnostic: None,
            cause_kind: None,
            policy: None,
            mismatches: Vec::new(),
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_object_id(mut self, object_id: impl Into<ObjectId>) -> Self {
        self.object_id = Some(object_id.into());
        self
    }

    pub fn with_object_name(mut self, object_name: impl Into<String>) -> Self {
        self.object_name = Some(object_name.into());
        self
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn with_remote(mut self, status: u16, diagnostic: impl Into<String>) -> Self {
        self.remote_status = Some(status);
        self.remote_diagnostic = Some(diagnostic.into());
        self
    }

    pub fn with_cause_kind(mut self, cause_kind: FaultKind) -> Self {
        self.cause_kind = Some(cause_kind);
        self
    }

    pub fn with_policy(mut self, policy: PolicyContext) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_mismatches(mut self, mismatches: Vec<FieldMismatch>) -> Self {
        self.mismatches = mismatches;
        self
    }

    /// Fills identity fields that are not already set. Lower layers raise faults
    /// without knowing which object they were working on.
    pub fn in_context(
        mut self,
        operation: Operation,
        object_id: Option<&str>,
        object_name: Option<&str>,
    ) -> Self {
        if self.operation.is_none() {
            self.operation = Some(operation);
        }
        if self.object_id.is_none() {
            self.object_id = object_id.map(str::to_string);
        }
        if self.object_name.is_none() {
            self.object_name = object_name.map(str::to_string);
        }
        self
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(operation) = self.operation {
            write!(f, "{operation} ")?;
        }
        match (&self.object_name, &self.object_id) {
            (Some(name), Some(id)) => write!(f, "'{name}' ({id}): ")?,
            (Some(name), None) => write!(f, "'{name}': ")?,
            (None, Some(id)) => write!(f, "{id}: ")?,
            (None, None) => {}
        }
        write!(f, "{}", self.message)?;
        if let Some(diagnostic) = &self.remote_diagnostic {
            match self.remote_status {
                Some(status) => write!(f, " (remote status {status}: {diagnostic})")?,
                None => write!(f, " (remote: {diagnostic})")?,
            }
        }
        for mismatch in &self.mismatches {
            write!(
                f,
                "\nmismatch on attribute {}:\nexpected value: {}\nactual value:   {}",
                mismatch.field, mismatch.expected, mismatch.actual
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for Fault {}

pub fn validation_fault(message: impl Into<String>) -> Fault {
    Fault::new(FaultKind::Validation, message).with_retryable(false)
}

pub fn consistency_fault(message: impl Into<String>) -> Fault {
    Fault::new(FaultKind::Consistency, message).with_retryable(false)
}

pub fn cancelled(message: impl Into<String>) -> Fault {
    Fault::new(FaultKind::Cancelled, message).with_retryable(false)
}

pub fn internal_error(message: impl Into<String>) -> Fault {
    Fault::new(FaultKind::Internal, message).with_retryable(false)
}
