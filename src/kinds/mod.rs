use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use validator::Validate;

use crate::{
    error::{Fault, internal_error, validation_fault},
    reconciler::DesiredState,
    types::AttributeBag,
};

pub mod language;
pub mod role;

pub use language::Language;
pub use role::Role;

/// A typed record for one object kind. The dynamic attribute bag is checked
/// once here, so the engine never sees a malformed payload.
pub trait ManagedObject: Sized {
    const KIND: &'static str;

    fn from_attributes(attributes: &AttributeBag) -> Result<Self, Fault>;

    fn to_attributes(&self) -> Result<AttributeBag, Fault>;

    fn desired_state(&self) -> Result<DesiredState, Fault>;
}

pub(crate) fn decode_record<T>(kind: &str, attributes: &AttributeBag) -> Result<T, Fault>
where
    T: DeserializeOwned + Validate,
{
    let value = Value::Object(
        attributes
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
    );
    let record: T = serde_json::from_value(value)
        .map_err(|err| validation_fault(format!("invalid {kind} attributes: {err}")))?;
    record
        .validate()
        .map_err(|err| validation_fault(format!("invalid {kind} attributes: {err}")))?;
    Ok(record)
}

pub(crate) fn encode_record<T: Serialize>(kind: &str, record: &T) -> Result<AttributeBag, Fault> {
    match serde_json::to_value(record) {
        Ok(Value::Object(fields)) => Ok(fields.into_iter().collect()),
        Ok(other) => Err(internal_error(format!(
            "{kind} record encoded to a non-object value: {other}"
        ))),
        Err(err) => Err(internal_error(format!("failed to encode {kind} record: {err}"))),
    }
}
