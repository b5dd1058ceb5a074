use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Fault, FaultKind},
    types::{AttributeBag, ObjectId, RemoteObject},
};

pub mod memory;

/// Coarse status classes the engine cares about. Everything else about the
/// remote response stays inside the binding layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusClass {
    NotFound,
    Conflict,
    Transient,
    Invalid,
    Forbidden,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub status: u16,
    pub message: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            correlation_id: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(409, message)
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn status_class(&self) -> StatusClass {
        match self.status {
            404 | 410 => StatusClass::NotFound,
            409 | 412 => StatusClass::Conflict,
            408 | 429 => StatusClass::Transient,
            401 | 403 => StatusClass::Forbidden,
            400 | 422 => StatusClass::Invalid,
            500..=599 => StatusClass::Transient,
            _ => StatusClass::Other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_class() == StatusClass::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.status_class() == StatusClass::Conflict
    }

    fn diagnostic(&self) -> String {
        match &self.correlation_id {
            Some(correlation_id) => format!("{} [correlation_id={}]", self.message, correlation_id),
            None => self.message.clone(),
        }
    }

    /// Maps the error onto the fault taxonomy. A not-found is transient here;
    /// callers that expect absence treat it as success before getting this far.
    pub fn to_fault(&self) -> Fault {
        let (kind, summary) = match self.status_class() {
            StatusClass::NotFound => (FaultKind::NotFoundTransient, "object not found"),
            StatusClass::Conflict => (FaultKind::VersionConflict, "version conflict"),
            StatusClass::Transient => (FaultKind::RemoteUnavailable, "remote temporarily unavailable"),
            StatusClass::Invalid => (FaultKind::Validation, "remote rejected the request"),
            StatusClass::Forbidden => (FaultKind::Forbidden, "remote denied the request"),
            StatusClass::Other => (FaultKind::Remote, "remote request failed"),
        };
        Fault::new(kind, summary).with_remote(self.status, self.diagnostic())
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "API error {}: {}", self.status, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<ApiError> for Fault {
    fn from(err: ApiError) -> Self {
        err.to_fault()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub entities: Vec<RemoteObject>,
    pub page_count: u32,
}

impl Page {
    pub fn empty() -> Self {
        Self {
            entities: Vec::new(),
            page_count: 0,
        }
    }
}

/// What the remote returned for a create. Some object kinds acknowledge with
/// an empty body, leaving both fields unset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateAck {
    pub id: Option<ObjectId>,
    pub object: Option<RemoteObject>,
}

impl CreateAck {
    pub fn with_object(object: RemoteObject) -> Self {
        Self {
            id: Some(object.id.clone()),
            object: Some(object),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn assigned_id(&self) -> Option<&str> {
        self.id
            .as_deref()
            .or_else(|| self.object.as_ref().map(|object| object.id.as_str()))
            .filter(|id| !id.trim().is_empty())
    }
}

/// Control-plane contract for one object kind.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    fn kind(&self) -> &str;

    /// Pages are numbered from 1.
    async fn list_page(&self, page_number: u32, page_size: u32) -> Result<Page, ApiError>;

    async fn get(&self, id: &str) -> Result<RemoteObject, ApiError>;

    async fn create(&self, attributes: &AttributeBag) -> Result<CreateAck, ApiError>;

    async fn update(&self, id: &str, attributes: &AttributeBag) -> Result<RemoteObject, ApiError>;

    async fn delete(&self, id: &str) -> Result<(), ApiError>;

    async fn restore_defaults(&self, id: &str) -> Result<(), ApiError> {
        Err(ApiError::new(
            405,
            format!("{} does not support restoring defaults for {}", self.kind(), id),
        ))
    }
}
