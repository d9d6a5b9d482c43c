//! In-memory storage backend for tests and embedding in other processes.
//!
//! All state lives behind a single `parking_lot::RwLock`, so activation is
//! one write-locked swap of the active pointer and readers never observe an
//! intermediate state.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::models::{CatalogVersion, ProductCanonical};

use super::{
    rollback_target, ProductRepository, StoredVector, VectorArtifactStore, VersionStore,
    VersionSummary,
};

#[derive(Default)]
struct State {
    /// Oldest first; creation order is the rollback order.
    versions: Vec<CatalogVersion>,
    active: Option<String>,
    /// Versions that have been activated at least once.
    published: HashSet<String>,
    products: HashMap<String, BTreeMap<i64, ProductCanonical>>,
    vectors: HashMap<(String, String), Vec<StoredVector>>,
}

impl State {
    fn position(&self, version_id: &str) -> Option<usize> {
        self.versions.iter().position(|v| v.version_id == version_id)
    }

    fn snapshot(&self, v: &CatalogVersion) -> CatalogVersion {
        CatalogVersion {
            is_active: self.active.as_deref() == Some(v.version_id.as_str()),
            ..v.clone()
        }
    }
}

/// In-memory implementation of every storage trait.
pub struct InMemoryCatalog {
    state: RwLock<State>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VersionStore for InMemoryCatalog {
    async fn create_version(&self, description: &str) -> Result<CatalogVersion> {
        let version = CatalogVersion {
            version_id: Uuid::new_v4().to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
            is_active: false,
        };
        self.state.write().versions.push(version.clone());
        Ok(version)
    }

    async fn activate_version(&self, version_id: &str) -> Result<bool> {
        let mut state = self.state.write();
        if state.position(version_id).is_none() {
            return Ok(false);
        }
        state.active = Some(version_id.to_string());
        state.published.insert(version_id.to_string());
        Ok(true)
    }

    async fn get_active_version(&self) -> Result<Option<String>> {
        Ok(self.state.read().active.clone())
    }

    async fn rollback_to_previous(&self) -> Result<Option<String>> {
        let mut state = self.state.write();
        let published: Vec<String> = state
            .versions
            .iter()
            .filter(|v| state.published.contains(&v.version_id))
            .map(|v| v.version_id.clone())
            .collect();
        let Some(id) = rollback_target(&published, state.active.as_deref()).map(str::to_string)
        else {
            return Ok(None);
        };
        state.active = Some(id.clone());
        Ok(Some(id))
    }

    async fn list_versions(&self) -> Result<Vec<VersionSummary>> {
        let state = self.state.read();
        Ok(state
            .versions
            .iter()
            .rev()
            .map(|v| VersionSummary {
                version: state.snapshot(v),
                product_count: state.products.get(&v.version_id).map_or(0, |p| p.len()),
            })
            .collect())
    }

    async fn delete_version(&self, version_id: &str) -> Result<bool> {
        let mut state = self.state.write();
        if state.active.as_deref() == Some(version_id) {
            return Ok(false);
        }
        let Some(idx) = state.position(version_id) else {
            return Ok(false);
        };
        state.versions.remove(idx);
        state.published.remove(version_id);
        state.products.remove(version_id);
        state.vectors.retain(|(v, _), _| v != version_id);
        Ok(true)
    }
}

#[async_trait]
impl ProductRepository for InMemoryCatalog {
    async fn insert_products(
        &self,
        version_id: &str,
        products: &[ProductCanonical],
    ) -> Result<usize> {
        let mut state = self.state.write();
        if state.position(version_id).is_none() {
            bail!("unknown catalog version: {}", version_id);
        }
        if state.products.get(version_id).is_some_and(|p| !p.is_empty()) {
            bail!("catalog version {} is already populated", version_id);
        }
        let mut rows = BTreeMap::new();
        for p in products {
            if p.catalog_version != version_id {
                bail!(
                    "product {} is stamped with version {}, expected {}",
                    p.product_id,
                    p.catalog_version,
                    version_id
                );
            }
            if rows.insert(p.product_id, p.clone()).is_some() {
                bail!("duplicate product_id {} in version {}", p.product_id, version_id);
            }
        }
        let n = rows.len();
        state.products.insert(version_id.to_string(), rows);
        Ok(n)
    }

    async fn get_products(&self, version_id: &str, ids: &[i64]) -> Result<Vec<ProductCanonical>> {
        let state = self.state.read();
        let Some(rows) = state.products.get(version_id) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| rows.get(id).cloned()).collect())
    }

    async fn list_products(&self, version_id: &str) -> Result<Vec<ProductCanonical>> {
        let state = self.state.read();
        Ok(state
            .products
            .get(version_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn count_products(&self, version_id: &str) -> Result<usize> {
        Ok(self
            .state
            .read()
            .products
            .get(version_id)
            .map_or(0, |p| p.len()))
    }
}

#[async_trait]
impl VectorArtifactStore for InMemoryCatalog {
    async fn save_vectors(
        &self,
        version_id: &str,
        model: &str,
        vectors: &[StoredVector],
    ) -> Result<()> {
        self.state.write().vectors.insert(
            (version_id.to_string(), model.to_string()),
            vectors.to_vec(),
        );
        Ok(())
    }

    async fn load_vectors(&self, version_id: &str, model: &str) -> Result<Vec<StoredVector>> {
        Ok(self
            .state
            .read()
            .vectors
            .get(&(version_id.to_string(), model.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_vectors(&self, version_id: &str) -> Result<()> {
        self.state
            .write()
            .vectors
            .retain(|(v, _), _| v != version_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProductStatus;
    use crate::store::prune_versions;

    fn product(id: i64, version: &str) -> ProductCanonical {
        ProductCanonical {
            product_id: id,
            name_raw: format!("Item {}", id),
            name_canonical: format!("item {}", id),
            brand: String::new(),
            department: String::new(),
            category: String::new(),
            subcategory: String::new(),
            attributes: Default::default(),
            status: ProductStatus::Active,
            searchable_text: format!("item {}", id),
            catalog_version: version.to_string(),
            updated_at: Utc::now(),
        }
    }

    async fn active_count(store: &InMemoryCatalog) -> usize {
        store
            .list_versions()
            .await
            .unwrap()
            .iter()
            .filter(|s| s.version.is_active)
            .count()
    }

    #[tokio::test]
    async fn test_create_starts_inactive() {
        let store = InMemoryCatalog::new();
        let v = store.create_version("first").await.unwrap();
        assert!(!v.is_active);
        assert_eq!(store.get_active_version().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_activate_swaps_single_active() {
        let store = InMemoryCatalog::new();
        let a = store.create_version("a").await.unwrap();
        let b = store.create_version("b").await.unwrap();

        assert!(store.activate_version(&a.version_id).await.unwrap());
        assert_eq!(active_count(&store).await, 1);
        assert!(store.activate_version(&b.version_id).await.unwrap());
        assert_eq!(active_count(&store).await, 1);
        assert_eq!(
            store.get_active_version().await.unwrap().as_deref(),
            Some(b.version_id.as_str())
        );

        assert!(!store.activate_version("missing").await.unwrap());
        assert_eq!(
            store.get_active_version().await.unwrap().as_deref(),
            Some(b.version_id.as_str())
        );
    }

    #[tokio::test]
    async fn test_rollback_walks_back_by_creation() {
        let store = InMemoryCatalog::new();
        assert_eq!(store.rollback_to_previous().await.unwrap(), None);

        let a = store.create_version("a").await.unwrap();
        store.activate_version(&a.version_id).await.unwrap();
        assert_eq!(store.rollback_to_previous().await.unwrap(), None);

        let b = store.create_version("b").await.unwrap();
        store.activate_version(&b.version_id).await.unwrap();
        assert_eq!(
            store.rollback_to_previous().await.unwrap().as_deref(),
            Some(a.version_id.as_str())
        );
        assert_eq!(
            store.get_active_version().await.unwrap().as_deref(),
            Some(a.version_id.as_str())
        );
    }

    #[tokio::test]
    async fn test_rollback_skips_versions_never_activated() {
        let store = InMemoryCatalog::new();
        let a = store.create_version("a").await.unwrap();
        store.activate_version(&a.version_id).await.unwrap();
        let _unfinished = store.create_version("b").await.unwrap();
        let c = store.create_version("c").await.unwrap();
        store.activate_version(&c.version_id).await.unwrap();

        assert_eq!(
            store.rollback_to_previous().await.unwrap().as_deref(),
            Some(a.version_id.as_str())
        );
    }

    #[tokio::test]
    async fn test_rollback_with_two_versions_never_returns_none() {
        let store = InMemoryCatalog::new();
        let a = store.create_version("a").await.unwrap();
        let b = store.create_version("b").await.unwrap();
        assert_eq!(store.rollback_to_previous().await.unwrap(), None);

        store.activate_version(&a.version_id).await.unwrap();
        store.activate_version(&b.version_id).await.unwrap();
        for _ in 0..2 {
            assert_eq!(
                store.rollback_to_previous().await.unwrap().as_deref(),
                Some(a.version_id.as_str())
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_readers_always_see_one_active_version() {
        let store = std::sync::Arc::new(InMemoryCatalog::new());
        let mut ids = Vec::new();
        for name in ["a", "b", "c"] {
            let v = store.create_version(name).await.unwrap().version_id;
            store.activate_version(&v).await.unwrap();
            ids.push(v);
        }

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..500 {
                    store.activate_version(&ids[i % 3]).await.unwrap();
                    store.rollback_to_previous().await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        while !writer.is_finished() {
            assert!(store.get_active_version().await.unwrap().is_some());
            assert_eq!(active_count(&store).await, 1);
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_populated_version_is_immutable() {
        let store = InMemoryCatalog::new();
        let v = store.create_version("v").await.unwrap();
        let id = v.version_id.as_str();
        assert_eq!(
            store
                .insert_products(id, &[product(1, id), product(2, id)])
                .await
                .unwrap(),
            2
        );
        assert!(store.insert_products(id, &[product(3, id)]).await.is_err());
        assert_eq!(store.count_products(id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_insert_rejects_foreign_stamp_and_duplicates() {
        let store = InMemoryCatalog::new();
        let v = store.create_version("v").await.unwrap();
        let id = v.version_id.as_str();
        assert!(store.insert_products(id, &[product(1, "other")]).await.is_err());
        assert!(store
            .insert_products(id, &[product(1, id), product(1, id)])
            .await
            .is_err());
        assert!(store.insert_products("nope", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_get_products_skips_unknown() {
        let store = InMemoryCatalog::new();
        let v = store.create_version("v").await.unwrap();
        let id = v.version_id.as_str();
        store
            .insert_products(id, &[product(1, id), product(2, id)])
            .await
            .unwrap();
        let got = store.get_products(id, &[2, 99]).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].product_id, 2);
        assert!(store.get_products("other", &[1]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prune_keeps_active_and_newest() {
        let store = InMemoryCatalog::new();
        let a = store.create_version("a").await.unwrap();
        let b = store.create_version("b").await.unwrap();
        let c = store.create_version("c").await.unwrap();
        store.activate_version(&a.version_id).await.unwrap();

        let removed = prune_versions(&store, 1).await.unwrap();
        assert_eq!(removed, vec![b.version_id.clone()]);

        let remaining: Vec<String> = store
            .list_versions()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.version.version_id)
            .collect();
        assert_eq!(remaining, vec![c.version_id, a.version_id.clone()]);
        assert!(!store.delete_version(&a.version_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_vectors_scoped_by_version_and_model() {
        let store = InMemoryCatalog::new();
        let v = StoredVector {
            product_id: 1,
            content_hash: "h".into(),
            embedding: vec![1.0, 0.0],
        };
        store.save_vectors("v1", "m", &[v.clone()]).await.unwrap();
        assert_eq!(store.load_vectors("v1", "m").await.unwrap(), vec![v]);
        assert!(store.load_vectors("v1", "other").await.unwrap().is_empty());
        store.delete_vectors("v1").await.unwrap();
        assert!(store.load_vectors("v1", "m").await.unwrap().is_empty());
    }
}
