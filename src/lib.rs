pub mod cache;
pub mod config;
pub mod error;
pub mod kinds;
pub mod logging;
pub mod policy;
pub mod poll;
pub mod reconciler;
pub mod remote;
pub mod telemetry;
pub mod types;
pub mod verify;

pub use error::{Fault, FaultKind, Operation};
pub use reconciler::{DesiredState, KindProfile, ReconcileContext, ReconcileEngine, Reconciler};
pub use types::{AttributeBag, Lifecycle, ObjectId, RemoteObject};
