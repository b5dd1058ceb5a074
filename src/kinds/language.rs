use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    error::Fault,
    kinds::{ManagedObject, decode_record, encode_record},
    reconciler::DesiredState,
    types::AttributeBag,
};

/// A routing language. Only the name is configurable; the remote rejects
/// duplicates and reports names in a searchable listing that may lag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Language {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
}

impl Language {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ManagedObject for Language {
    const KIND: &'static str = "language";

    fn from_attributes(attributes: &AttributeBag) -> Result<Self, Fault> {
        decode_record(Self::KIND, attributes)
    }

    fn to_attributes(&self) -> Result<AttributeBag, Fault> {
        encode_record(Self::KIND, self)
    }

    fn desired_state(&self) -> Result<DesiredState, Fault> {
        Ok(DesiredState::new(self.name.clone(), self.to_attributes()?))
    }
}
