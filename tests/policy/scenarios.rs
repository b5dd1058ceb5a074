use std::{collections::BTreeMap, sync::Arc};

use convergence::{
    error::FaultKind,
    policy::{
        CatalogPolicyValidator, PermissionCatalog, PolicyRule, PolicyValidator,
        StaticCatalogSource, validate_rule,
    },
};

fn directory_source() -> StaticCatalogSource {
    StaticCatalogSource::new().with_entity("directory", "user", ["add", "edit"])
}

fn validator() -> CatalogPolicyValidator {
    CatalogPolicyValidator::new(Arc::new(directory_source()))
}

#[tokio::test]
async fn given_known_action_when_validating_then_rule_is_valid() {
    let rules = vec![PolicyRule::new("directory", "user", ["add"])];
    validator()
        .validate_rules(&rules)
        .await
        .expect("rule should be valid");
}

#[tokio::test]
async fn given_unknown_action_when_validating_then_action_not_found_is_fatal() {
    let rules = vec![PolicyRule::new("directory", "user", ["delete"])];
    let err = validator()
        .validate_rules(&rules)
        .await
        .expect_err("rule should be rejected");

    assert_eq!(err.kind, FaultKind::PermissionPolicy);
    assert!(!err.retryable);
    assert!(err.message.contains("action delete not found for domain directory, entity name user"));
    assert!(err.message.contains("ensure your org has the required product for this permission"));
    let policy = err.policy.expect("policy context attached");
    assert_eq!(policy.domain, "directory");
    assert_eq!(policy.entity_name.as_deref(), Some("user"));
    assert_eq!(policy.action.as_deref(), Some("delete"));
}

#[tokio::test]
async fn given_wildcard_entity_with_no_actions_when_validating_then_rule_is_valid() {
    let rules = vec![PolicyRule::new("directory", "*", Vec::<String>::new())];
    validator()
        .validate_rules(&rules)
        .await
        .expect("wildcard entity should be valid");
}

#[tokio::test]
async fn given_wildcard_entity_when_catalog_is_empty_then_rule_is_still_valid() {
    let empty = CatalogPolicyValidator::new(Arc::new(StaticCatalogSource::new()));
    let rules = vec![PolicyRule::new("telephony", "*", ["anything", "*"])];
    empty
        .validate_rules(&rules)
        .await
        .expect("wildcard entity ignores the catalog");
}

#[tokio::test]
async fn given_unknown_domain_when_validating_then_domain_not_found() {
    let rules = vec![
        PolicyRule::new("directory", "user", ["add"]),
        PolicyRule::new("billing", "invoice", ["view"]),
    ];
    let err = validator()
        .validate_rules(&rules)
        .await
        .expect_err("unknown domain");
    assert!(err.message.contains("domain billing not found"));
}

#[test]
fn given_same_catalog_and_rule_when_validated_repeatedly_then_verdict_is_stable() {
    let mut entities = BTreeMap::new();
    entities.insert("user".to_string(), vec!["add".to_string(), "edit".to_string()]);
    let catalog = PermissionCatalog::new().with_domain("directory", entities);

    for rule in [
        PolicyRule::new("directory", "user", ["add"]),
        PolicyRule::new("directory", "user", ["delete"]),
        PolicyRule::new("directory", "group", ["add"]),
        PolicyRule::new("directory", "*", ["x"]),
    ] {
        let first = validate_rule(&catalog, &rule);
        for _ in 0..5 {
            assert_eq!(validate_rule(&catalog, &rule), first);
        }
    }
}
