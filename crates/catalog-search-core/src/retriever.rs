//! The capability shared by every retrieval strategy.
//!
//! Lexical and vector retrieval are interchangeable behind [`Retriever`]:
//! the builder asks each one to index a version, and the search service
//! queries each one the same way before handing the lists to fusion.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ProductCanonical, RetrievalSource, RetrievedItem};
use crate::store::ProductRepository;

/// A version-scoped retrieval index.
///
/// Indexes are derived artifacts: they can always be rebuilt from the
/// [`ProductRepository`] for the same version.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Tag carried by every [`RetrievedItem`] this retriever returns.
    fn source(&self) -> RetrievalSource;

    /// Build (or replace) the index for `version` from `records`.
    async fn build_index(&self, records: &[ProductCanonical], version: &str) -> Result<()>;

    /// Return at most `top_k` items, best first.
    ///
    /// A version without an index yields an empty list, not an error.
    async fn search(&self, query: &str, version: &str, top_k: usize) -> Result<Vec<RetrievedItem>>;

    fn has_index(&self, version: &str) -> bool;

    /// Forget the in-process index for `version`.
    fn drop_index(&self, version: &str);

    /// Load a previously persisted artifact for `version` without
    /// recomputing it. Returns `false` when nothing was persisted.
    async fn load_index(&self, _version: &str) -> Result<bool> {
        Ok(false)
    }

    /// Make `version` queryable: reuse what is loaded, then what was
    /// persisted, and only then rebuild from the repository.
    async fn ensure_index(&self, version: &str, repo: &dyn ProductRepository) -> Result<()> {
        if self.has_index(version) || self.load_index(version).await? {
            return Ok(());
        }
        let records = repo.list_products(version).await?;
        self.build_index(&records, version).await
    }
}

/// Sort retrieved items best first; ties go to the lower product id.
pub(crate) fn rank_items(items: &mut [RetrievedItem]) {
    items.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.product_id.cmp(&b.product_id))
    });
}
