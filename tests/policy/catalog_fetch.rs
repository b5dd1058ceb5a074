use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
};

use async_trait::async_trait;

use convergence::{
    error::FaultKind,
    policy::{
        CatalogPolicyValidator, PermissionCatalogSource, PermissionPage, PolicyRule,
        PolicyValidator,
    },
    remote::ApiError,
};

/// Serves `routing/queue` across three pages and counts every request.
#[derive(Default)]
struct CountingSource {
    calls: AtomicU32,
    domains: Mutex<Vec<String>>,
}

#[async_trait]
impl PermissionCatalogSource for CountingSource {
    async fn permission_page(
        &self,
        domain: &str,
        page_number: u32,
        _page_size: u32,
    ) -> Result<PermissionPage, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.domains
            .lock()
            .expect("lock poisoned")
            .push(format!("{domain}#{page_number}"));

        let actions: &[&str] = match (domain, page_number) {
            ("routing", 1) => &["view"],
            ("routing", 2) => &["edit"],
            ("routing", 3) => &["add"],
            ("directory", 1) => &["add", "edit"],
            _ => return Ok(PermissionPage::default()),
        };
        let entity = if domain == "routing" { "queue" } else { "user" };
        let mut entry = BTreeMap::new();
        entry.insert(
            entity.to_string(),
            actions.iter().map(|action| action.to_string()).collect(),
        );
        Ok(PermissionPage {
            entries: vec![entry],
            page_count: if domain == "routing" { 3 } else { 1 },
        })
    }
}

#[tokio::test]
async fn given_actions_on_later_pages_when_validating_then_all_pages_are_read() {
    let source = Arc::new(CountingSource::default());
    let validator = CatalogPolicyValidator::new(source.clone());

    validator
        .validate_rules(&[PolicyRule::new("routing", "queue", ["add", "view"])])
        .await
        .expect("actions spread over pages are found");

    assert_eq!(source.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn given_rules_sharing_domains_when_validating_then_each_domain_is_fetched_once() {
    let source = Arc::new(CountingSource::default());
    let validator = CatalogPolicyValidator::new(source.clone());
    let rules = vec![
        PolicyRule::new("directory", "user", ["add"]),
        PolicyRule::new("directory", "user", ["edit"]),
        PolicyRule::new("routing", "queue", ["view"]),
    ];

    validator.validate_rules(&rules).await.expect("valid rules");

    let mut requested = source.domains.lock().expect("lock poisoned").clone();
    requested.sort();
    assert_eq!(
        requested,
        vec!["directory#1", "routing#1", "routing#2", "routing#3"]
    );
}

#[tokio::test]
async fn given_only_wildcard_entities_when_validating_then_catalog_is_not_fetched() {
    let source = Arc::new(CountingSource::default());
    let validator = CatalogPolicyValidator::new(source.clone());

    validator
        .validate_rules(&[PolicyRule::new("directory", "*", ["*"])])
        .await
        .expect("wildcard entity is valid");

    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
}

struct DeniedSource;

#[async_trait]
impl PermissionCatalogSource for DeniedSource {
    async fn permission_page(
        &self,
        _domain: &str,
        _page_number: u32,
        _page_size: u32,
    ) -> Result<PermissionPage, ApiError> {
        Err(ApiError::new(403, "missing authorization:permission:view"))
    }
}

#[tokio::test]
async fn given_catalog_fetch_denied_when_validating_then_remote_text_is_surfaced() {
    let validator = CatalogPolicyValidator::new(Arc::new(DeniedSource));

    let err = validator
        .validate_rules(&[PolicyRule::new("directory", "user", ["add"])])
        .await
        .expect_err("fetch fails");

    assert_eq!(err.kind, FaultKind::Forbidden);
    assert!(err.to_string().contains("missing authorization:permission:view"));
}
