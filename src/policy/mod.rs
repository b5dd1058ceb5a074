pub mod catalog;
pub mod types;
pub mod validator;

pub use catalog::{PermissionCatalogSource, PermissionPage, StaticCatalogSource, fetch_domain_catalog};
pub use types::{
    ConditionTerm, ConditionTree, Conjunction, DomainCatalog, Operand, OperandKind, Operator,
    PermissionCatalog, PolicyRule, WILDCARD,
};
pub use validator::{
    CatalogPolicyValidator, POLICY_HINT, PolicyValidator, PolicyViolation, check_conditions,
    validate_rule,
};
