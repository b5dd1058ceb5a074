use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::{
    error::{Fault, Operation, PolicyContext},
    policy::types::DomainCatalog,
    remote::ApiError,
};

/// One page of the remote permission listing for a domain. Each entry maps
/// entity names to the actions allowed on them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionPage {
    pub entries: Vec<BTreeMap<String, Vec<String>>>,
    pub page_count: u32,
}

#[async_trait]
pub trait PermissionCatalogSource: Send + Sync {
    /// Pages are numbered from 1.
    async fn permission_page(
        &self,
        domain: &str,
        page_number: u32,
        page_size: u32,
    ) -> Result<PermissionPage, ApiError>;
}

/// Fetches every page of allowed permissions for `domain`. An empty result
/// means the domain is unknown to the org.
pub async fn fetch_domain_catalog(
    source: &dyn PermissionCatalogSource,
    domain: &str,
    page_size: u32,
) -> Result<DomainCatalog, Fault> {
    let page_size = page_size.max(1);
    let mut catalog = DomainCatalog::new();

    let first = source
        .permission_page(domain, 1, page_size)
        .await
        .map_err(|err| catalog_fault(domain, err))?;
    if first.entries.is_empty() {
        return Ok(catalog);
    }
    merge_page(&mut catalog, first.entries);

    for page_number in 2..=first.page_count {
        let page = source
            .permission_page(domain, page_number, page_size)
            .await
            .map_err(|err| catalog_fault(domain, err))?;
        if page.entries.is_empty() {
            break;
        }
        merge_page(&mut catalog, page.entries);
    }

    tracing::debug!(
        target: "policy",
        domain = domain,
        entities = catalog.len(),
        "permission_catalog_fetched"
    );
    Ok(catalog)
}

fn merge_page(catalog: &mut DomainCatalog, entries: Vec<BTreeMap<String, Vec<String>>>) {
    for entry in entries {
        for (entity_name, actions) in entry {
            let allowed = catalog.entry(entity_name).or_default();
            for action in actions {
                if !allowed.contains(&action) {
                    allowed.push(action);
                }
            }
        }
    }
}

fn catalog_fault(domain: &str, err: ApiError) -> Fault {
    let mut fault = Fault::from(err)
        .with_operation(Operation::ValidatePolicy)
        .with_policy(PolicyContext {
            domain: domain.to_string(),
            entity_name: None,
            action: None,
        });
    fault.message = format!("error requesting org permissions: {}", fault.message);
    fault
}

/// Catalog held in memory, served as a single page per domain.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalogSource {
    domains: BTreeMap<String, DomainCatalog>,
}

impl StaticCatalogSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity<I, S>(mut self, domain: &str, entity_name: &str, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domains
            .entry(domain.to_string())
            .or_default()
            .insert(
                entity_name.to_string(),
                actions.into_iter().map(Into::into).collect(),
            );
        self
    }
}

#[async_trait]
impl PermissionCatalogSource for StaticCatalogSource {
    async fn permission_page(
        &self,
        domain: &str,
        page_number: u32,
        _page_size: u32,
    ) -> Result<PermissionPage, ApiError> {
        match self.domains.get(domain) {
            Some(catalog) if page_number == 1 => Ok(PermissionPage {
                entries: vec![catalog.clone()],
                page_count: 1,
            }),
            _ => Ok(PermissionPage::default()),
        }
    }
}
