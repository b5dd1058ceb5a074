use std::future::Future;

use async_trait::async_trait;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::Instrument;

use crate::{
    cache::{ExportMap, list_all, populate_from_listing},
    error::{Fault, FaultKind, Operation, validation_fault},
    poll::{Deadline, cancellation_fault, poll_until, timeout_fault, within_deadline},
    reconciler::{DesiredState, PollingConfig, ReconcileContext, Reconciler},
    remote::ApiError,
    telemetry::{OperationId, ReconcileTelemetryEvent, new_operation_id},
    types::{Lifecycle, ObjectId, RemoteObject},
    verify::ConsistencyVerifier,
};

pub struct ReconcileEngine {
    ctx: ReconcileContext,
    verifier: ConsistencyVerifier,
    polling: PollingConfig,
}

impl ReconcileEngine {
    pub fn new(ctx: ReconcileContext) -> Self {
        let verifier = ConsistencyVerifier::new(ctx.profile.settles_asynchronously.iter().cloned());
        let polling = ctx.profile.polling();
        Self {
            ctx,
            verifier,
            polling,
        }
    }

    pub fn context(&self) -> &ReconcileContext {
        &self.ctx
    }

    pub fn kind(&self) -> &str {
        self.ctx.remote.kind()
    }

    async fn tracked<T, F, Fut>(
        &self,
        operation: Operation,
        object_id: Option<&str>,
        body: F,
    ) -> Result<T, Fault>
    where
        F: FnOnce(OperationId) -> Fut,
        Fut: Future<Output = Result<T, Fault>>,
    {
        let operation_id = new_operation_id();
        let started_at = Instant::now();
        let object_id = object_id.map(str::to_string);
        self.ctx
            .telemetry
            .on_event(ReconcileTelemetryEvent::OperationStarted {
                operation_id,
                operation,
                kind: self.kind().to_string(),
                object_id: object_id.clone(),
            });

        let span = self.ctx.run_span.in_scope(|| {
            tracing::info_span!(
                target: "reconciler",
                "reconcile",
                operation = %operation,
                kind = %self.kind(),
                object_id = object_id.as_deref().unwrap_or("-"),
                operation_id = %operation_id,
            )
        });
        let result = body(operation_id).instrument(span).await;
        let elapsed_ms = started_at.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => {
                tracing::info!(
                    target: "reconciler",
                    operation = %operation,
                    kind = %self.kind(),
                    object_id = object_id.as_deref().unwrap_or("-"),
                    elapsed_ms = elapsed_ms,
                    "reconcile_completed"
                );
                self.ctx
                    .telemetry
                    .on_event(ReconcileTelemetryEvent::OperationCompleted {
                        operation_id,
                        operation,
                        object_id,
                        elapsed_ms,
                    });
            }
            Err(fault) if fault.kind == FaultKind::Cancelled => {
                tracing::info!(
                    target: "reconciler",
                    operation = %operation,
                    kind = %self.kind(),
                    object_id = object_id.as_deref().unwrap_or("-"),
                    "reconcile_cancelled"
                );
                self.ctx
                    .telemetry
                    .on_event(ReconcileTelemetryEvent::OperationCancelled {
                        operation_id,
                        operation,
                        object_id,
                    });
            }
            Err(fault) => {
                tracing::warn!(
                    target: "reconciler",
                    operation = %operation,
                    kind = %self.kind(),
                    fault_kind = ?fault.kind,
                    elapsed_ms = elapsed_ms,
                    error = %fault,
                    "reconcile_failed"
                );
                self.ctx
                    .telemetry
                    .on_event(ReconcileTelemetryEvent::OperationFailed {
                        operation_id,
                        operation,
                        object_id,
                        fault_kind: fault.kind,
                        cause_kind: fault.cause_kind,
                    });
            }
        }
        result
    }

    fn attempt_failed(
        &self,
        operation_id: OperationId,
        operation: Operation,
        attempt: u32,
        fault: Fault,
    ) -> Fault {
        self.ctx
            .telemetry
            .on_event(ReconcileTelemetryEvent::AttemptFailed {
                operation_id,
                operation,
                attempt,
                fault_kind: fault.kind,
                retryable: fault.retryable,
            });
        fault
    }

    /// Policy rules are checked before any write. The remote accepts rules it
    /// cannot honour, so a policy-bearing object without a validator is refused.
    async fn validate_policies(
        &self,
        desired: &DesiredState,
        operation: Operation,
        object_id: Option<&str>,
        deadline: &Deadline,
    ) -> Result<(), Fault> {
        if desired.policy_rules.is_empty() {
            return Ok(());
        }
        let Some(validator) = &self.ctx.validator else {
            tracing::warn!(
                target: "reconciler",
                kind = %self.kind(),
                name = %desired.name,
                rules = desired.policy_rules.len(),
                "policy_validator_missing"
            );
            return Err(validation_fault(format!(
                "{} carries {} permission policy rule(s) but no policy validator is configured",
                self.kind(),
                desired.policy_rules.len()
            ))
            .in_context(operation, object_id, Some(&desired.name)));
        };
        within_deadline(
            "validate_policy",
            deadline,
            validator.validate_rules(&desired.policy_rules),
        )
        .await
        .and_then(|verdict| verdict)
        .map_err(|fault| fault.in_context(operation, object_id, Some(&desired.name)))
    }

    /// One read classified for the poll loop. `min_version` rejects views
    /// older than a write the remote already acknowledged.
    async fn observe(
        &self,
        operation: Operation,
        id: &str,
        min_version: Option<u64>,
    ) -> Result<RemoteObject, Fault> {
        let object = self
            .ctx
            .remote
            .get(id)
            .await
            .map_err(|err| Fault::from(err).in_context(operation, Some(id), None))?;

        match object.lifecycle {
            Lifecycle::Present => {}
            Lifecycle::Creating | Lifecycle::Absent => {
                return Err(Fault::new(
                    FaultKind::NotFoundTransient,
                    format!("object is not settled yet (lifecycle {:?})", object.lifecycle),
                )
                .in_context(operation, Some(id), None));
            }
            Lifecycle::Deleting => {
                return Err(
                    Fault::new(FaultKind::NotFoundTerminal, "object is being deleted")
                        .in_context(operation, Some(id), Some(object.label())),
                );
            }
        }

        if let (Some(acknowledged), Some(observed)) = (min_version, object.version)
            && observed < acknowledged
        {
            return Err(Fault::new(
                FaultKind::VersionConflict,
                format!("stale read: observed version {observed}, acknowledged {acknowledged}"),
            )
            .in_context(operation, Some(id), Some(object.label())));
        }

        Ok(object)
    }

    async fn poll_read(
        &self,
        operation_id: OperationId,
        operation: Operation,
        id: &str,
        min_version: Option<u64>,
        deadline: &Deadline,
    ) -> Result<RemoteObject, Fault> {
        let backoff = self.polling.backoff();
        poll_until(operation.as_str(), deadline, &backoff, move |attempt| async move {
            self.observe(operation, id, min_version)
                .await
                .map_err(|fault| self.attempt_failed(operation_id, operation, attempt, fault))
        })
        .await
    }

    /// Issues a write, re-issuing the whole call on version conflict or
    /// transient unavailability with a linear step, bounded by attempts,
    /// the deadline and cancellation.
    async fn submit<T, F, Fut>(
        &self,
        operation_id: OperationId,
        operation: Operation,
        object_id: Option<&str>,
        object_name: Option<&str>,
        deadline: &Deadline,
        mut call: F,
    ) -> Result<T, Fault>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let max_attempts = self.polling.conflict_max_attempts.max(1);
        let mut attempt = 1_u32;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = deadline.cancellation().cancelled() => {
                    return Err(cancellation_fault(operation.as_str(), None)
                        .in_context(operation, object_id, object_name));
                }
                outcome = timeout_at(deadline.expires_at(), call()) => outcome,
            };

            let fault = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => Fault::from(err),
                Err(_) => Fault::new(
                    FaultKind::RemoteUnavailable,
                    "remote call did not complete before the deadline",
                ),
            }
            .in_context(operation, object_id, object_name);
            let fault = self.attempt_failed(operation_id, operation, attempt, fault);

            let reissue = fault.retryable
                && matches!(
                    fault.kind,
                    FaultKind::VersionConflict | FaultKind::RemoteUnavailable
                );
            if !reissue {
                return Err(fault.with_retryable(false));
            }
            if attempt >= max_attempts {
                let mut exhausted = fault.with_retryable(false);
                exhausted.message = format!(
                    "{} (gave up after {} attempts)",
                    exhausted.message, attempt
                );
                return Err(exhausted);
            }

            let delay = self.polling.conflict_delay(attempt);
            if delay >= deadline.remaining() {
                return Err(timeout_fault(operation.as_str(), deadline, fault));
            }
            tracing::debug!(
                target: "reconciler",
                operation = %operation,
                attempt = attempt,
                kind = ?fault.kind,
                delay_ms = delay.as_millis() as u64,
                "write_reissued"
            );
            tokio::select! {
                biased;
                _ = deadline.cancellation().cancelled() => {
                    return Err(cancellation_fault(operation.as_str(), Some(&fault))
                        .in_context(operation, object_id, object_name));
                }
                _ = sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn verify_after_write(
        &self,
        operation: Operation,
        id: &str,
        desired: &DesiredState,
        deadline: &Deadline,
    ) -> Result<RemoteObject, Fault> {
        match self
            .verifier
            .verify_remote(self.ctx.remote.as_ref(), id, &desired.attributes, deadline)
            .await
        {
            Ok(verified) => {
                self.ctx.cache.set(id, verified.clone());
                Ok(verified)
            }
            Err(fault) => {
                self.ctx.cache.delete(id);
                Err(fault.in_context(operation, Some(id), Some(&desired.name)))
            }
        }
    }

    async fn converge_update(
        &self,
        operation_id: OperationId,
        operation: Operation,
        id: &str,
        desired: &DesiredState,
        deadline: &Deadline,
    ) -> Result<RemoteObject, Fault> {
        let remote = self.ctx.remote.as_ref();
        let attributes = &desired.attributes;
        let name = Some(desired.name.as_str());

        let acknowledged = self
            .submit(operation_id, operation, Some(id), name, deadline, move || {
                remote.update(id, attributes)
            })
            .await?;
        self.ctx.cache.delete(id);

        let observed = self
            .poll_read(operation_id, operation, id, acknowledged.version, deadline)
            .await
            .map_err(|fault| fault.in_context(operation, Some(id), name))?;
        self.ctx.cache.set(id, observed);

        self.verify_after_write(operation, id, desired, deadline).await
    }
}

#[async_trait]
impl Reconciler for ReconcileEngine {
    async fn create_then_verify(
        &self,
        desired: &DesiredState,
        deadline: &Deadline,
    ) -> Result<RemoteObject, Fault> {
        self.tracked(
            Operation::Create,
            desired.protected_id.as_deref(),
            |operation_id| async move {
                let name = Some(desired.name.as_str());
                self.validate_policies(desired, Operation::Create, None, deadline)
                    .await?;

                if let Some(protected_id) = desired.protected_id.as_deref() {
                    let existing = within_deadline(
                        "create",
                        deadline,
                        self.ctx.remote.get(protected_id),
                    )
                    .await
                    .map_err(|fault| {
                        fault.in_context(Operation::Create, Some(protected_id), name)
                    })?
                    .map_err(|err| {
                        let missing = err.is_not_found();
                        let mut fault = Fault::from(err)
                            .with_retryable(false)
                            .in_context(Operation::Create, Some(protected_id), name);
                        if missing {
                            fault.kind = FaultKind::NotFoundTerminal;
                            fault.message = "default object does not exist".to_string();
                        }
                        fault
                    })?;
                    tracing::info!(
                        target: "reconciler",
                        id = %existing.id,
                        label = %existing.label(),
                        "default_object_adopted"
                    );
                    return self
                        .converge_update(
                            operation_id,
                            Operation::Create,
                            protected_id,
                            desired,
                            deadline,
                        )
                        .await;
                }

                let ack = within_deadline(
                    "create",
                    deadline,
                    self.ctx.remote.create(&desired.attributes),
                )
                .await
                .map_err(|fault| {
                    let fault = fault.in_context(Operation::Create, None, name);
                    self.attempt_failed(operation_id, Operation::Create, 1, fault)
                })?
                .map_err(|err| {
                    let fault = Fault::from(err)
                        .with_retryable(false)
                        .in_context(Operation::Create, None, name);
                    self.attempt_failed(operation_id, Operation::Create, 1, fault)
                })?;

                let id: ObjectId = self
                    .ctx
                    .profile
                    .id_assignment
                    .resolve(&ack, &desired.attributes)
                    .map_err(|fault| fault.in_context(Operation::Create, None, name))?;
                tracing::debug!(target: "reconciler", id = %id, "create_acknowledged");

                let min_version = ack.object.as_ref().and_then(|object| object.version);
                let observed = self
                    .poll_read(operation_id, Operation::Create, &id, min_version, deadline)
                    .await
                    .map_err(|fault| fault.in_context(Operation::Create, Some(&id), name))?;
                self.ctx.cache.set(&id, observed);

                self.verify_after_write(Operation::Create, &id, desired, deadline)
                    .await
            },
        )
        .await
    }

    async fn read_with_retry(&self, id: &str, deadline: &Deadline) -> Result<RemoteObject, Fault> {
        self.tracked(Operation::Read, Some(id), |operation_id| async move {
            if let Some(cached) = self.ctx.cache.get(id)
                && cached.lifecycle == Lifecycle::Present
            {
                tracing::debug!(target: "reconciler", id = id, "cache_hit");
                return Ok(cached);
            }

            let object = self
                .poll_read(operation_id, Operation::Read, id, None, deadline)
                .await?;
            self.ctx.cache.set(id, object.clone());
            Ok(object)
        })
        .await
    }

    async fn update_then_verify(
        &self,
        id: &str,
        desired: &DesiredState,
        deadline: &Deadline,
    ) -> Result<RemoteObject, Fault> {
        self.tracked(Operation::Update, Some(id), |operation_id| async move {
            self.validate_policies(desired, Operation::Update, Some(id), deadline)
                .await?;
            self.converge_update(operation_id, Operation::Update, id, desired, deadline)
                .await
        })
        .await
    }

    async fn delete_then_confirm_absence(
        &self,
        id: &str,
        desired: &DesiredState,
        deadline: &Deadline,
    ) -> Result<(), Fault> {
        self.tracked(Operation::Delete, Some(id), |operation_id| async move {
            let remote = self.ctx.remote.as_ref();
            let name = Some(desired.name.as_str());

            if desired.is_protected() {
                self.submit(
                    operation_id,
                    Operation::RestoreDefaults,
                    Some(id),
                    name,
                    deadline,
                    move || remote.restore_defaults(id),
                )
                .await?;
                self.ctx.cache.delete(id);
                tracing::info!(target: "reconciler", id = id, "default_object_restored");
                return Ok(());
            }

            self.submit(
                operation_id,
                Operation::Delete,
                Some(id),
                name,
                deadline,
                move || async move {
                    match remote.delete(id).await {
                        Err(err) if err.is_not_found() => Ok(()),
                        other => other,
                    }
                },
            )
            .await?;
            self.ctx.cache.delete(id);

            let kind = self.kind();
            let backoff = self.polling.backoff();
            poll_until("delete", deadline, &backoff, move |attempt| async move {
                let fault = match remote.get(id).await {
                    Err(err) if err.is_not_found() => return Ok(()),
                    Err(err) => Fault::from(err),
                    Ok(_) => Fault::new(
                        FaultKind::VersionConflict,
                        format!("{kind} {id} still exists"),
                    ),
                }
                .in_context(Operation::Delete, Some(id), name);
                Err(self.attempt_failed(operation_id, Operation::Delete, attempt, fault))
            })
            .await?;

            self.ctx.cache.delete(id);
            Ok(())
        })
        .await
    }

    async fn lookup_id_by_name(&self, name: &str, deadline: &Deadline) -> Result<ObjectId, Fault> {
        self.tracked(Operation::LookupByName, None, |operation_id| async move {
            let remote = self.ctx.remote.as_ref();
            let cache = self.ctx.cache.as_ref();
            let page_size = self.ctx.page_size;
            let backoff = self.polling.backoff();

            poll_until("lookup", deadline, &backoff, move |attempt| async move {
                let objects = list_all(remote, page_size).await.map_err(|fault| {
                    self.attempt_failed(operation_id, Operation::LookupByName, attempt, fault)
                })?;

                let mut found = None;
                for object in objects {
                    if found.is_none()
                        && object.lifecycle == Lifecycle::Present
                        && object.label() == name
                    {
                        found = Some(object.id.clone());
                    }
                    let id = object.id.clone();
                    cache.set(&id, object);
                }

                found.ok_or_else(|| {
                    let fault = Fault::new(
                        FaultKind::NotFoundTransient,
                        format!("no {} named '{}' found", remote.kind(), name),
                    )
                    .in_context(Operation::LookupByName, None, Some(name));
                    self.attempt_failed(operation_id, Operation::LookupByName, attempt, fault)
                })
            })
            .await
        })
        .await
    }

    async fn enumerate(&self) -> Result<ExportMap, Fault> {
        self.tracked(Operation::Enumerate, None, |_| async move {
            populate_from_listing(
                self.ctx.remote.as_ref(),
                self.ctx.cache.as_ref(),
                self.ctx.page_size,
            )
            .await
        })
        .await
    }
}
