use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    cache::ObjectCache,
    error::{Fault, Operation},
    remote::RemoteApi,
    types::{AttributeBag, ObjectId, RemoteObject},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportEntry {
    pub label: String,
    pub content_hash: Option<String>,
}

pub type ExportMap = BTreeMap<ObjectId, ExportEntry>;

/// Walks every page of the listing, starting at page 1, until the remote
/// returns an empty page or the reported page count is passed.
pub async fn list_all(remote: &dyn RemoteApi, page_size: u32) -> Result<Vec<RemoteObject>, Fault> {
    let page_size = page_size.max(1);
    let mut collected = Vec::new();
    let mut page_number = 1_u32;

    loop {
        let page = remote
            .list_page(page_number, page_size)
            .await
            .map_err(|err| {
                Fault::from(err).in_context(Operation::Enumerate, None, Some(remote.kind()))
            })?;

        if page.entities.is_empty() {
            break;
        }
        collected.extend(page.entities);

        if page.page_count != 0 && page_number >= page.page_count {
            break;
        }
        page_number = page_number.saturating_add(1);
    }

    tracing::debug!(
        target: "cache",
        kind = remote.kind(),
        pages = page_number,
        objects = collected.len(),
        "listing_collected"
    );
    Ok(collected)
}

/// Enumerates every object of the remote's kind into the cache so later
/// single-object reads in the same run skip the network.
pub async fn populate_from_listing(
    remote: &dyn RemoteApi,
    cache: &dyn ObjectCache,
    page_size: u32,
) -> Result<ExportMap, Fault> {
    let objects = list_all(remote, page_size).await?;
    let mut exported = ExportMap::new();

    for object in objects {
        let id = object.id.clone();
        exported.insert(
            id.clone(),
            ExportEntry {
                label: object.label().to_string(),
                content_hash: content_hash(&object.attributes),
            },
        );
        cache.set(&id, object);
    }

    tracing::info!(
        target: "cache",
        kind = remote.kind(),
        objects = exported.len(),
        cached = cache.len(),
        "cache_populated"
    );
    Ok(exported)
}

/// SHA-256 over the canonical JSON form of the attributes. Keys are ordered, so
/// equal bags hash equally regardless of insertion order.
pub fn content_hash(attributes: &AttributeBag) -> Option<String> {
    if attributes.is_empty() {
        return None;
    }
    let canonical = serde_json::to_string(attributes).ok()?;
    let digest = Sha256::digest(canonical.as_bytes());
    Some(format!("{digest:x}"))
}
