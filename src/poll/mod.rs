use std::future::Future;

use tokio::time::{sleep, timeout_at};

use crate::{
    error::{Fault, FaultKind, cancelled},
    types::OperationOutcome,
};

pub mod backoff;
pub mod deadline;
pub mod guard;

pub use backoff::BackoffConfig;
pub use deadline::Deadline;
pub use guard::{PollGuard, PollVerdict};

/// Drives `attempt` until it succeeds, fails fatally, the deadline runs out or
/// the deadline's token is cancelled. The attempt number passed in starts at 0.
///
/// A retryable fault still pending when the budget is spent becomes a fatal
/// `Timeout` that keeps the last cause's remote diagnostic. Cancellation is
/// reported as `Cancelled`, never as `Timeout`.
pub async fn poll_until<T, F, Fut>(
    label: &'static str,
    deadline: &Deadline,
    backoff: &BackoffConfig,
    mut attempt: F,
) -> Result<T, Fault>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Fault>>,
{
    let mut attempt_no = 0_u32;
    let mut last_fault: Option<Fault> = None;

    loop {
        if deadline.is_cancelled() {
            return Err(cancellation_fault(label, last_fault.as_ref()));
        }

        let outcome = tokio::select! {
            biased;
            _ = deadline.cancellation().cancelled() => {
                return Err(cancellation_fault(label, last_fault.as_ref()));
            }
            outcome = timeout_at(deadline.expires_at(), attempt(attempt_no)) => outcome,
        };

        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(last_fault.take().unwrap_or_else(|| {
                Fault::new(
                    FaultKind::RemoteUnavailable,
                    "remote call did not complete before the deadline",
                )
            })),
        };

        let fault = match PollGuard::judge(result, deadline) {
            OperationOutcome::Success(value) => {
                if attempt_no > 0 {
                    tracing::debug!(
                        target: "poll",
                        label = label,
                        attempts = attempt_no + 1,
                        elapsed_ms = deadline.elapsed().as_millis() as u64,
                        "poll_converged"
                    );
                }
                return Ok(value);
            }
            OperationOutcome::RetryableError(fault) => fault,
            OperationOutcome::FatalError(fault) if fault.retryable && deadline.is_expired() => {
                let timed_out = timeout_fault(label, deadline, fault);
                tracing::warn!(
                    target: "poll",
                    label = label,
                    attempts = attempt_no + 1,
                    budget_ms = deadline.budget().as_millis() as u64,
                    error = %timed_out,
                    "poll_deadline_exceeded"
                );
                return Err(timed_out);
            }
            OperationOutcome::FatalError(fault) => {
                tracing::debug!(
                    target: "poll",
                    label = label,
                    attempt = attempt_no,
                    kind = ?fault.kind,
                    "poll_fatal"
                );
                return Err(fault);
            }
        };

        let delay = backoff.delay(attempt_no).min(deadline.remaining());
        tracing::debug!(
            target: "poll",
            label = label,
            attempt = attempt_no,
            kind = ?fault.kind,
            delay_ms = delay.as_millis() as u64,
            error = %fault.message,
            "poll_retrying"
        );
        last_fault = Some(fault);

        tokio::select! {
            biased;
            _ = deadline.cancellation().cancelled() => {
                return Err(cancellation_fault(label, last_fault.as_ref()));
            }
            _ = sleep(delay) => {}
        }
        attempt_no = attempt_no.saturating_add(1);
    }
}

/// Runs one remote call that is never retried, bounded by the deadline and its
/// cancellation token. The outer error is a `Cancelled` or `Timeout` fault; the
/// inner result is the call's own.
pub async fn within_deadline<T, E, Fut>(
    label: &'static str,
    deadline: &Deadline,
    call: Fut,
) -> Result<Result<T, E>, Fault>
where
    Fut: Future<Output = Result<T, E>>,
{
    tokio::select! {
        biased;
        _ = deadline.cancellation().cancelled() => Err(cancellation_fault(label, None)),
        outcome = timeout_at(deadline.expires_at(), call) => outcome.map_err(|_| {
            timeout_fault(
                label,
                deadline,
                Fault::new(
                    FaultKind::RemoteUnavailable,
                    "remote call did not complete before the deadline",
                ),
            )
        }),
    }
}

pub(crate) fn timeout_fault(label: &str, deadline: &Deadline, last: Fault) -> Fault {
    let mut fault = Fault::new(
        FaultKind::Timeout,
        format!(
            "{} did not converge within {}s; last error: {}",
            label,
            deadline.budget().as_secs_f64(),
            last.message
        ),
    )
    .with_retryable(false)
    .with_cause_kind(last.kind);
    fault.object_id = last.object_id;
    fault.object_name = last.object_name;
    fault.operation = last.operation;
    fault.remote_status = last.remote_status;
    fault.remote_diagnostic = last.remote_diagnostic;
    fault
}

pub(crate) fn cancellation_fault(label: &str, last: Option<&Fault>) -> Fault {
    let mut fault = cancelled(format!("{label} was cancelled by the caller"));
    if let Some(last) = last {
        fault.cause_kind = Some(last.kind);
        fault.object_id = last.object_id.clone();
        fault.object_name = last.object_name.clone();
        fault.operation = last.operation;
    }
    fault
}
