use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    error::Fault,
    kinds::{ManagedObject, decode_record, encode_record},
    policy::PolicyRule,
    reconciler::DesiredState,
    types::AttributeBag,
};

/// An authorization role: a named bundle of permissions and permission
/// policies. Roles that ship with the org are adopted through
/// `default_role_id` and restored rather than deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Role {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    #[serde(default)]
    #[validate(nested)]
    pub permission_policies: Vec<PolicyRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1))]
    pub default_role_id: Option<String>,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            permissions: BTreeSet::new(),
            permission_policies: Vec::new(),
            default_role_id: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_policy(mut self, rule: PolicyRule) -> Self {
        self.permission_policies.push(rule);
        self
    }

    pub fn with_default_role_id(mut self, default_role_id: impl Into<String>) -> Self {
        self.default_role_id = Some(default_role_id.into());
        self
    }
}

impl ManagedObject for Role {
    const KIND: &'static str = "role";

    fn from_attributes(attributes: &AttributeBag) -> Result<Self, Fault> {
        decode_record(Self::KIND, attributes)
    }

    fn to_attributes(&self) -> Result<AttributeBag, Fault> {
        encode_record(Self::KIND, self)
    }

    fn desired_state(&self) -> Result<DesiredState, Fault> {
        let mut desired = DesiredState::new(self.name.clone(), self.to_attributes()?)
            .with_policy_rules(self.permission_policies.clone());
        if let Some(default_role_id) = &self.default_role_id {
            desired = desired.with_protected_id(default_role_id.clone());
        }
        Ok(desired)
    }
}
