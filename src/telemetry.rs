use std::sync::OnceLock;

use uuid::Uuid;

use crate::error::{FaultKind, Operation};

pub type OperationId = Uuid;

pub fn new_operation_id() -> OperationId {
    Uuid::now_v7()
}

#[derive(Debug, Clone)]
pub enum ReconcileTelemetryEvent {
    OperationStarted {
        operation_id: OperationId,
        operation: Operation,
        kind: String,
        object_id: Option<String>,
    },
    AttemptFailed {
        operation_id: OperationId,
        operation: Operation,
        attempt: u32,
        fault_kind: FaultKind,
        retryable: bool,
    },
    OperationCompleted {
        operation_id: OperationId,
        operation: Operation,
        object_id: Option<String>,
        elapsed_ms: u64,
    },
    OperationFailed {
        operation_id: OperationId,
        operation: Operation,
        object_id: Option<String>,
        fault_kind: FaultKind,
        cause_kind: Option<FaultKind>,
    },
    OperationCancelled {
        operation_id: OperationId,
        operation: Operation,
        object_id: Option<String>,
    },
}

pub trait TelemetrySink: Send + Sync {
    fn on_event(&self, event: ReconcileTelemetryEvent);
}

pub fn reconciler_debug_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| {
        std::env::var("CONVERGENCE_DEBUG_RECONCILER")
            .ok()
            .is_some_and(|raw| env_flag_enabled(&raw))
    })
}

fn env_flag_enabled(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "debug"
    )
}

#[derive(Default)]
pub struct NoopTelemetrySink;

impl TelemetrySink for NoopTelemetrySink {
    fn on_event(&self, _event: ReconcileTelemetryEvent) {}
}

/// Forwards events to `tracing` under the `reconciler` target. Silent unless
/// `CONVERGENCE_DEBUG_RECONCILER` is set.
#[derive(Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn on_event(&self, event: ReconcileTelemetryEvent) {
        if !reconciler_debug_enabled() {
            return;
        }

        match event {
            ReconcileTelemetryEvent::OperationStarted {
                operation_id,
                operation,
                kind,
                object_id,
            } => {
                tracing::info!(
                    target: "reconciler",
                    operation_id = %operation_id,
                    operation = %operation,
                    kind = %kind,
                    object_id = object_id.as_deref().unwrap_or("-"),
                    "operation_started"
                );
            }
            ReconcileTelemetryEvent::AttemptFailed {
                operation_id,
                operation,
                attempt,
                fault_kind,
                retryable,
            } => {
                tracing::info!(
                    target: "reconciler",
                    operation_id = %operation_id,
                    operation = %operation,
                    attempt = attempt,
                    fault_kind = ?fault_kind,
                    retryable = retryable,
                    "attempt_failed"
                );
            }
            ReconcileTelemetryEvent::OperationCompleted {
                operation_id,
                operation,
                object_id,
                elapsed_ms,
            } => {
                tracing::info!(
                    target: "reconciler",
                    operation_id = %operation_id,
                    operation = %operation,
                    object_id = object_id.as_deref().unwrap_or("-"),
                    elapsed_ms = elapsed_ms,
                    "operation_completed"
                );
            }
            ReconcileTelemetryEvent::OperationFailed {
                operation_id,
                operation,
                object_id,
                fault_kind,
                cause_kind,
            } => {
                tracing::info!(
                    target: "reconciler",
                    operation_id = %operation_id,
                    operation = %operation,
                    object_id = object_id.as_deref().unwrap_or("-"),
                    fault_kind = ?fault_kind,
                    cause_kind = ?cause_kind,
                    "operation_failed"
                );
            }
            ReconcileTelemetryEvent::OperationCancelled {
                operation_id,
                operation,
                object_id,
            } => {
                tracing::info!(
                    target: "reconciler",
                    operation_id = %operation_id,
                    operation = %operation,
                    object_id = object_id.as_deref().unwrap_or("-"),
                    "operation_cancelled"
                );
            }
        }
    }
}
