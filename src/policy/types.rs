use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use validator::Validate;

pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct PolicyRule {
    #[validate(length(min = 1))]
    pub domain: String,
    #[validate(length(min = 1))]
    pub entity_name: String,
    #[serde(default, rename = "action_set")]
    pub actions: BTreeSet<String>,
    #[serde(default)]
    pub conditions: Option<ConditionTree>,
}

impl PolicyRule {
    pub fn new<I, S>(domain: impl Into<String>, entity_name: impl Into<String>, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            domain: domain.into(),
            entity_name: entity_name.into(),
            actions: actions.into_iter().map(Into::into).collect(),
            conditions: None,
        }
    }

    pub fn with_conditions(mut self, conditions: ConditionTree) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn is_wildcard_entity(&self) -> bool {
        self.entity_name == WILDCARD
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Conjunction {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionTree {
    #[serde(default)]
    pub conjunction: Conjunction,
    #[serde(default)]
    pub terms: Vec<ConditionTerm>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operator {
    Eq,
    In,
    Ge,
    Gt,
    Le,
    Lt,
}

impl Operator {
    pub fn is_ordering(&self) -> bool {
        matches!(self, Operator::Ge | Operator::Gt | Operator::Le | Operator::Lt)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionTerm {
    pub variable_name: String,
    pub operator: Operator,
    #[serde(default)]
    pub operands: Vec<Operand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperandKind {
    User,
    Queue,
    Scalar,
    Variable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Operand {
    User { user_id: String },
    Queue { queue_id: String },
    Scalar { value: String },
    Variable { value: String },
}

impl Operand {
    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::User { .. } => OperandKind::User,
            Operand::Queue { .. } => OperandKind::Queue,
            Operand::Scalar { .. } => OperandKind::Scalar,
            Operand::Variable { .. } => OperandKind::Variable,
        }
    }

    /// The reference id or literal carried by the operand.
    pub fn payload(&self) -> &str {
        match self {
            Operand::User { user_id } => user_id,
            Operand::Queue { queue_id } => queue_id,
            Operand::Scalar { value } | Operand::Variable { value } => value,
        }
    }
}

/// Allowed actions per entity within one domain.
pub type DomainCatalog = BTreeMap<String, Vec<String>>;

/// `domain -> entity -> [action]`, assembled fresh for each validation call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionCatalog {
    domains: BTreeMap<String, DomainCatalog>,
}

impl PermissionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_domain(mut self, domain: impl Into<String>, catalog: DomainCatalog) -> Self {
        self.insert_domain(domain, catalog);
        self
    }

    pub fn insert_domain(&mut self, domain: impl Into<String>, catalog: DomainCatalog) {
        self.domains.insert(domain.into(), catalog);
    }

    pub fn domain(&self, domain: &str) -> Option<&DomainCatalog> {
        self.domains.get(domain)
    }

    pub fn is_empty(&self) -> bool {
        self.domains.values().all(BTreeMap::is_empty)
    }
}
