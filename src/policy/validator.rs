use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use futures_util::future::try_join_all;
use thiserror::Error;

use crate::{
    error::{Fault, FaultKind, Operation, PolicyContext},
    policy::{
        catalog::{PermissionCatalogSource, fetch_domain_catalog},
        types::{ConditionTree, Operand, PermissionCatalog, PolicyRule, WILDCARD},
    },
};

pub const POLICY_HINT: &str = "ensure your org has the required product for this permission";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("domain {domain} not found")]
    DomainNotFound { domain: String },
    #[error("entity_name {entity_name} not found for domain {domain}")]
    EntityNotFound { domain: String, entity_name: String },
    #[error("action {action} not found for domain {domain}, entity name {entity_name}")]
    ActionNotFound {
        domain: String,
        entity_name: String,
        action: String,
    },
    #[error("invalid condition on {domain}/{entity_name}: {reason}")]
    InvalidCondition {
        domain: String,
        entity_name: String,
        reason: String,
    },
}

impl PolicyViolation {
    pub fn context(&self) -> PolicyContext {
        match self {
            PolicyViolation::DomainNotFound { domain } => PolicyContext {
                domain: domain.clone(),
                entity_name: None,
                action: None,
            },
            PolicyViolation::EntityNotFound {
                domain,
                entity_name,
            }
            | PolicyViolation::InvalidCondition {
                domain,
                entity_name,
                ..
            } => PolicyContext {
                domain: domain.clone(),
                entity_name: Some(entity_name.clone()),
                action: None,
            },
            PolicyViolation::ActionNotFound {
                domain,
                entity_name,
                action,
            } => PolicyContext {
                domain: domain.clone(),
                entity_name: Some(entity_name.clone()),
                action: Some(action.clone()),
            },
        }
    }
}

impl From<PolicyViolation> for Fault {
    fn from(violation: PolicyViolation) -> Self {
        let context = violation.context();
        let fault = match &violation {
            PolicyViolation::InvalidCondition { .. } => {
                Fault::new(FaultKind::Validation, violation.to_string())
            }
            _ => Fault::new(
                FaultKind::PermissionPolicy,
                format!("permission policy not found: {violation}, {POLICY_HINT}"),
            ),
        };
        fault
            .with_retryable(false)
            .with_operation(Operation::ValidatePolicy)
            .with_policy(context)
    }
}

/// Checks a rule against an already fetched catalog. Pure: the same catalog
/// and rule always produce the same verdict.
pub fn validate_rule(catalog: &PermissionCatalog, rule: &PolicyRule) -> Result<(), PolicyViolation> {
    if rule.is_wildcard_entity() {
        return Ok(());
    }

    let domain_catalog = catalog
        .domain(&rule.domain)
        .filter(|entities| !entities.is_empty())
        .ok_or_else(|| PolicyViolation::DomainNotFound {
            domain: rule.domain.clone(),
        })?;

    let allowed = domain_catalog
        .get(&rule.entity_name)
        .ok_or_else(|| PolicyViolation::EntityNotFound {
            domain: rule.domain.clone(),
            entity_name: rule.entity_name.clone(),
        })?;

    for action in &rule.actions {
        let matched = if action == WILDCARD {
            !allowed.is_empty()
        } else {
            allowed.iter().any(|candidate| candidate == action)
        };
        if !matched {
            return Err(PolicyViolation::ActionNotFound {
                domain: rule.domain.clone(),
                entity_name: rule.entity_name.clone(),
                action: action.clone(),
            });
        }
    }

    Ok(())
}

/// Shape checks on the condition tree that need no catalog.
pub fn check_conditions(rule: &PolicyRule) -> Result<(), PolicyViolation> {
    let Some(tree) = &rule.conditions else {
        return Ok(());
    };
    check_tree(tree).map_err(|reason| PolicyViolation::InvalidCondition {
        domain: rule.domain.clone(),
        entity_name: rule.entity_name.clone(),
        reason,
    })
}

fn check_tree(tree: &ConditionTree) -> Result<(), String> {
    for (index, term) in tree.terms.iter().enumerate() {
        if term.variable_name.trim().is_empty() {
            return Err(format!("term {index} has an empty variable name"));
        }
        if term.operands.is_empty() {
            return Err(format!("term {} has no operands", term.variable_name));
        }
        if term.operator.is_ordering() && term.operands.len() != 1 {
            return Err(format!(
                "term {} uses {:?} which takes exactly one operand, got {}",
                term.variable_name,
                term.operator,
                term.operands.len()
            ));
        }
        for operand in &term.operands {
            if operand.payload().trim().is_empty() {
                let field = match operand {
                    Operand::User { .. } => "user_id",
                    Operand::Queue { .. } => "queue_id",
                    Operand::Scalar { .. } | Operand::Variable { .. } => "value",
                };
                return Err(format!(
                    "term {} has a {:?} operand with an empty {field}",
                    term.variable_name,
                    operand.kind()
                ));
            }
        }
    }
    Ok(())
}

#[async_trait]
pub trait PolicyValidator: Send + Sync {
    /// Rejects the first invalid rule. Never writes to the remote.
    async fn validate_rules(&self, rules: &[PolicyRule]) -> Result<(), Fault>;
}

pub struct CatalogPolicyValidator {
    source: Arc<dyn PermissionCatalogSource>,
    page_size: u32,
}

/// Page size the permission catalog endpoint is read with.
pub const CATALOG_PAGE_SIZE: u32 = 100;

impl CatalogPolicyValidator {
    pub fn new(source: Arc<dyn PermissionCatalogSource>) -> Self {
        Self {
            source,
            page_size: CATALOG_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    async fn fetch_catalog(&self, domains: BTreeSet<&str>) -> Result<PermissionCatalog, Fault> {
        let fetched = try_join_all(domains.into_iter().map(|domain| async move {
            let entities = fetch_domain_catalog(self.source.as_ref(), domain, self.page_size).await?;
            Ok::<_, Fault>((domain, entities))
        }))
        .await?;

        let mut catalog = PermissionCatalog::new();
        for (domain, entities) in fetched {
            catalog.insert_domain(domain, entities);
        }
        Ok(catalog)
    }
}

#[async_trait]
impl PolicyValidator for CatalogPolicyValidator {
    async fn validate_rules(&self, rules: &[PolicyRule]) -> Result<(), Fault> {
        for rule in rules {
            check_conditions(rule)?;
        }

        let domains: BTreeSet<&str> = rules
            .iter()
            .filter(|rule| !rule.is_wildcard_entity())
            .map(|rule| rule.domain.as_str())
            .collect();
        let catalog = if domains.is_empty() {
            PermissionCatalog::new()
        } else {
            self.fetch_catalog(domains).await?
        };

        for rule in rules {
            if let Err(violation) = validate_rule(&catalog, rule) {
                tracing::warn!(
                    target: "policy",
                    domain = %rule.domain,
                    entity_name = %rule.entity_name,
                    error = %violation,
                    "policy_rule_rejected"
                );
                return Err(violation.into());
            }
        }

        tracing::debug!(target: "policy", rules = rules.len(), "policy_rules_validated");
        Ok(())
    }
}
