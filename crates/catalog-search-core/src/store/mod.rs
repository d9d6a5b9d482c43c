//! Storage abstraction for Catalog Search.
//!
//! Three traits split the persisted state by concern:
//!
//! | Trait | Owns |
//! |-------|------|
//! | [`VersionStore`] | Catalog version metadata and the single active pointer |
//! | [`ProductRepository`] | Canonical product rows, partitioned by version |
//! | [`VectorArtifactStore`] | Derived embedding vectors, keyed by version |
//!
//! Backends usually implement all three on one type (see
//! [`memory::InMemoryCatalog`] and the SQLite store in the app crate).
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{CatalogVersion, ProductCanonical};

/// Version metadata plus its row count, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct VersionSummary {
    #[serde(flatten)]
    pub version: CatalogVersion,
    pub product_count: usize,
}

/// An embedding persisted for one product of one version.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredVector {
    pub product_id: i64,
    /// SHA-256 of the `searchable_text` the vector was computed from.
    pub content_hash: String,
    pub embedding: Vec<f32>,
}

/// Catalog version lifecycle.
///
/// Activation is the only contended mutation in the system and must be
/// atomic: a concurrent reader observes either the previous or the new
/// active version, never zero or two.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Create a new, inactive, empty version.
    async fn create_version(&self, description: &str) -> Result<CatalogVersion>;

    /// Make `version_id` the only active version.
    ///
    /// Returns `false` if the version does not exist.
    async fn activate_version(&self, version_id: &str) -> Result<bool>;

    async fn get_active_version(&self) -> Result<Option<String>>;

    /// Activate the second-most-recent published version by creation time.
    ///
    /// A version is published once it has been activated; versions whose
    /// build never finished are skipped. When the active version is not
    /// the newest (after an earlier rollback), this steps one published
    /// version further back instead. See [`rollback_target`].
    ///
    /// Returns `None`, changing nothing, when fewer than two versions were
    /// ever published.
    async fn rollback_to_previous(&self) -> Result<Option<String>>;

    /// All versions, newest first.
    async fn list_versions(&self) -> Result<Vec<VersionSummary>>;

    /// Remove an inactive version together with its products and vectors.
    ///
    /// Returns `false` if the version does not exist or is active.
    async fn delete_version(&self, version_id: &str) -> Result<bool>;
}

/// Canonical product persistence.
#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Attach products to an empty version.
    ///
    /// Fails if the version does not exist or already has rows: a
    /// populated version is immutable.
    async fn insert_products(&self, version_id: &str, products: &[ProductCanonical])
        -> Result<usize>;

    /// Fetch products by id. Unknown ids are skipped; order is unspecified.
    async fn get_products(&self, version_id: &str, ids: &[i64]) -> Result<Vec<ProductCanonical>>;

    /// All products of a version ordered by `product_id`.
    async fn list_products(&self, version_id: &str) -> Result<Vec<ProductCanonical>>;

    async fn count_products(&self, version_id: &str) -> Result<usize>;
}

/// Persistence for derived embedding vectors.
#[async_trait]
pub trait VectorArtifactStore: Send + Sync {
    /// Replace the vectors stored for `(version_id, model)`.
    async fn save_vectors(&self, version_id: &str, model: &str, vectors: &[StoredVector])
        -> Result<()>;

    async fn load_vectors(&self, version_id: &str, model: &str) -> Result<Vec<StoredVector>>;

    async fn delete_vectors(&self, version_id: &str) -> Result<()>;
}

/// Pick the rollback target among `published` versions, oldest first.
///
/// Steps back from `active` when an older published version exists and
/// otherwise falls back to the second-most-recent one.
pub fn rollback_target<'a>(published: &'a [String], active: Option<&str>) -> Option<&'a str> {
    if published.len() < 2 {
        return None;
    }
    let idx = match active.and_then(|a| published.iter().position(|v| v == a)) {
        Some(i) if i > 0 => i - 1,
        _ => published.len() - 2,
    };
    Some(published[idx].as_str())
}

/// Delete inactive versions beyond the newest `keep`.
///
/// Returns the ids that were removed. The active version is never pruned
/// and does not count against `keep`.
pub async fn prune_versions<V: VersionStore + ?Sized>(store: &V, keep: usize) -> Result<Vec<String>> {
    let versions = store.list_versions().await?;
    let mut removed = Vec::new();
    for summary in versions
        .iter()
        .filter(|s| !s.version.is_active)
        .skip(keep)
    {
        if store.delete_version(&summary.version.version_id).await? {
            removed.push(summary.version.version_id.clone());
        }
    }
    Ok(removed)
}
