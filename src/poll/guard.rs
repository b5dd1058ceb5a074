use std::time::Duration;

use crate::{
    error::{Fault, FaultKind},
    poll::Deadline,
    types::OperationOutcome,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollVerdict {
    Retry,
    Fatal,
}

/// Decides whether a failed attempt is worth another try. Stateless: the only
/// inputs are the fault and where the clock stands against the budget.
pub struct PollGuard;

impl PollGuard {
    pub fn classify(fault: &Fault, deadline: &Deadline) -> PollVerdict {
        Self::classify_at(fault, deadline.elapsed(), deadline.budget())
    }

    /// Sorts one attempt's result into success, retry or give up.
    pub fn judge<T>(result: Result<T, Fault>, deadline: &Deadline) -> OperationOutcome<T> {
        match result {
            Ok(value) => OperationOutcome::Success(value),
            Err(fault) => match Self::classify(&fault, deadline) {
                PollVerdict::Retry => OperationOutcome::RetryableError(fault),
                PollVerdict::Fatal => OperationOutcome::FatalError(fault),
            },
        }
    }

    pub fn classify_at(fault: &Fault, elapsed: Duration, budget: Duration) -> PollVerdict {
        if elapsed >= budget {
            return PollVerdict::Fatal;
        }

        if fault.retryable && Self::is_transient(fault.kind) {
            PollVerdict::Retry
        } else {
            PollVerdict::Fatal
        }
    }

    pub fn is_transient(kind: FaultKind) -> bool {
        matches!(
            kind,
            FaultKind::NotFoundTransient | FaultKind::VersionConflict | FaultKind::RemoteUnavailable
        )
    }
}
