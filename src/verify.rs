use std::collections::BTreeSet;

use serde_json::Value;

use crate::{
    error::{Fault, FieldMismatch, Operation, consistency_fault},
    poll::{Deadline, within_deadline},
    remote::RemoteApi,
    types::{AttributeBag, RemoteObject},
};

/// One-shot comparison of the desired attribute bag against what the remote
/// reports after a mutation. Never retries.
#[derive(Debug, Clone, Default)]
pub struct ConsistencyVerifier {
    settles_asynchronously: BTreeSet<String>,
}

impl ConsistencyVerifier {
    pub fn new<I, S>(settles_asynchronously: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            settles_asynchronously: settles_asynchronously.into_iter().map(Into::into).collect(),
        }
    }

    pub fn skips(&self, field: &str) -> bool {
        self.settles_asynchronously.contains(field)
    }

    /// Every desired field whose observed value differs. Fields on the
    /// allow-list, and fields left empty in the desired bag that the remote
    /// filled in, are not compared.
    pub fn compare(&self, desired: &AttributeBag, observed: &AttributeBag) -> Vec<FieldMismatch> {
        desired
            .iter()
            .filter(|(field, _)| !self.skips(field))
            .filter_map(|(field, expected)| {
                let actual = observed.get(field).unwrap_or(&Value::Null);
                if is_computed(expected, actual) || values_match(expected, actual) {
                    return None;
                }
                Some(FieldMismatch {
                    field: field.clone(),
                    expected: expected.clone(),
                    actual: actual.clone(),
                })
            })
            .collect()
    }

    pub fn verify(&self, object: &RemoteObject, desired: &AttributeBag) -> Result<(), Fault> {
        let mismatches = self.compare(desired, &object.attributes);
        if mismatches.is_empty() {
            return Ok(());
        }
        let fields: Vec<&str> = mismatches.iter().map(|mismatch| mismatch.field.as_str()).collect();
        tracing::warn!(
            target: "reconciler",
            id = %object.id,
            fields = ?fields,
            "consistency_drift_detected"
        );
        Err(consistency_fault(format!(
            "observed state differs from desired state on {} attribute(s)",
            mismatches.len()
        ))
        .with_object_id(object.id.clone())
        .with_object_name(object.label().to_string())
        .with_operation(Operation::Verify)
        .with_mismatches(mismatches))
    }

    /// Reads the object straight from the remote, bypassing any cache, and
    /// compares it. Returns the observed object when it matches. The single
    /// read is still bounded by `deadline`.
    pub async fn verify_remote(
        &self,
        remote: &dyn RemoteApi,
        id: &str,
        desired: &AttributeBag,
        deadline: &Deadline,
    ) -> Result<RemoteObject, Fault> {
        let observed = within_deadline("verify", deadline, remote.get(id))
            .await
            .and_then(|read| read.map_err(Fault::from))
            .map_err(|fault| {
                fault
                    .with_retryable(false)
                    .in_context(Operation::Verify, Some(id), None)
            })?;
        self.verify(&observed, desired)?;
        Ok(observed)
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.iter().all(is_empty_value),
        Value::Object(fields) => fields.values().all(is_empty_value),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn is_computed(expected: &Value, actual: &Value) -> bool {
    is_empty_value(expected) && !is_empty_value(actual)
}

fn values_match(expected: &Value, actual: &Value) -> bool {
    if is_empty_value(expected) && is_empty_value(actual) {
        return true;
    }
    match (expected, actual) {
        (Value::Number(left), Value::Number(right)) => match (left.as_f64(), right.as_f64()) {
            (Some(left), Some(right)) => left == right,
            _ => left == right,
        },
        (Value::Array(left), Value::Array(right)) => multiset_match(left, right),
        (Value::Object(left), Value::Object(right)) => left.iter().all(|(key, expected)| {
            let actual = right.get(key).unwrap_or(&Value::Null);
            is_computed(expected, actual) || values_match(expected, actual)
        }),
        _ => expected == actual,
    }
}

fn multiset_match(expected: &[Value], actual: &[Value]) -> bool {
    let expected: Vec<&Value> = expected.iter().filter(|item| !is_empty_value(item)).collect();
    let actual: Vec<&Value> = actual.iter().filter(|item| !is_empty_value(item)).collect();
    if expected.len() != actual.len() {
        return false;
    }
    let mut used = vec![false; actual.len()];
    expected.iter().all(|wanted| {
        let found = actual
            .iter()
            .enumerate()
            .find(|(index, candidate)| !used[*index] && values_match(wanted, candidate))
            .map(|(index, _)| index);
        match found {
            Some(index) => {
                used[index] = true;
                true
            }
            None => false,
        }
    })
}
