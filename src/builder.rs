//! Catalog builds.
//!
//! A build turns raw source records into a new, fully indexed catalog
//! version and only then activates it:
//!
//! ```text
//! extract ──► canonicalize ──► create version ──► persist ──► index ──► activate
//! ```
//!
//! Extraction runs first so an empty source never leaves a dangling
//! version behind. Any failure after the version exists discards that
//! version; the previously active version keeps serving throughout.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use catalog_search_core::models::{
    Attributes, ProductCanonical, ProductStatus, RawRecord, ScalarValue,
};
use catalog_search_core::normalize::normalize_batch;
use catalog_search_core::retriever::Retriever;
use catalog_search_core::store::{ProductRepository, VersionStore};

use crate::config::ColumnMap;
use crate::error::BuildError;
use crate::extract::{parse_timestamp, RecordSource};

pub struct CatalogBuilder {
    versions: Arc<dyn VersionStore>,
    products: Arc<dyn ProductRepository>,
    source: Arc<dyn RecordSource>,
    retrievers: Vec<Arc<dyn Retriever>>,
    columns: ColumnMap,
}

impl CatalogBuilder {
    pub fn new(
        versions: Arc<dyn VersionStore>,
        products: Arc<dyn ProductRepository>,
        source: Arc<dyn RecordSource>,
        columns: ColumnMap,
    ) -> Self {
        Self {
            versions,
            products,
            source,
            retrievers: Vec::new(),
            columns,
        }
    }

    /// Index every new version with `retriever` before activation.
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retrievers.push(retriever);
        self
    }

    /// Build a new version from the full snapshot and activate it.
    pub async fn rebuild(&self, description: &str) -> Result<String, BuildError> {
        let started = Instant::now();
        let records = self.source.load_full().await.map_err(BuildError::Source)?;
        let products = canonicalize(&records, &self.columns);
        tracing::info!(
            raw = records.len(),
            usable = products.len(),
            "canonicalized full snapshot"
        );
        let version_id = self.publish(description, products).await?;
        tracing::info!(
            version = %version_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rebuild complete"
        );
        Ok(version_id)
    }

    /// Build a new version from the active one plus records changed since
    /// `since`, and activate it.
    ///
    /// Without an active version this is a full rebuild.
    pub async fn rebuild_incremental(
        &self,
        description: &str,
        since: DateTime<Utc>,
    ) -> Result<String, BuildError> {
        let active = self
            .versions
            .get_active_version()
            .await
            .map_err(BuildError::Storage)?;
        let Some(active) = active else {
            tracing::info!("no active version; running a full rebuild");
            return self.rebuild(description).await;
        };

        let started = Instant::now();
        let records = self
            .source
            .load_incremental(since)
            .await
            .map_err(BuildError::Source)?;
        let changed = canonicalize(&records, &self.columns);
        if changed.is_empty() {
            return Err(BuildError::EmptySource);
        }

        let base = self
            .products
            .list_products(&active)
            .await
            .map_err(BuildError::Storage)?;
        let base_count = base.len();
        let changed_count = changed.len();

        let mut merged: BTreeMap<i64, ProductCanonical> =
            base.into_iter().map(|p| (p.product_id, p)).collect();
        for p in changed {
            merged.insert(p.product_id, p);
        }
        tracing::info!(
            base = %active,
            base_count,
            changed = changed_count,
            merged = merged.len(),
            "overlaying changed records"
        );

        let version_id = self
            .publish(description, merged.into_values().collect())
            .await?;
        tracing::info!(
            version = %version_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "incremental rebuild complete"
        );
        Ok(version_id)
    }

    /// Create, populate, index and activate a version for `products`.
    async fn publish(
        &self,
        description: &str,
        mut products: Vec<ProductCanonical>,
    ) -> Result<String, BuildError> {
        if products.is_empty() {
            return Err(BuildError::EmptySource);
        }

        let previous = self.preload_active().await;

        let version = self
            .versions
            .create_version(description)
            .await
            .map_err(BuildError::Storage)?;
        let version_id = version.version_id;
        tracing::info!(version = %version_id, products = products.len(), "version created");

        for p in products.iter_mut() {
            p.catalog_version = version_id.clone();
            p.status = ProductStatus::Active;
        }

        if let Err(e) = self.products.insert_products(&version_id, &products).await {
            self.discard(&version_id).await;
            return Err(BuildError::Storage(e));
        }

        for retriever in &self.retrievers {
            if let Err(e) = retriever.build_index(&products, &version_id).await {
                self.discard(&version_id).await;
                return Err(BuildError::Index {
                    index: retriever.source().to_string(),
                    source: e,
                });
            }
        }

        match self.versions.activate_version(&version_id).await {
            Ok(true) => {
                tracing::info!(version = %version_id, "version activated");
                self.release_indexes(&version_id, previous.as_deref()).await;
                Ok(version_id)
            }
            Ok(false) => {
                self.discard(&version_id).await;
                Err(BuildError::Activation {
                    version_id,
                    source: anyhow::anyhow!("version disappeared before activation"),
                })
            }
            Err(e) => {
                self.discard(&version_id).await;
                Err(BuildError::Activation {
                    version_id,
                    source: e,
                })
            }
        }
    }

    /// Load persisted artifacts of the active version so the new build can
    /// reuse them, and return that version. Failures only cost reuse.
    async fn preload_active(&self) -> Option<String> {
        let active = match self.versions.get_active_version().await {
            Ok(Some(active)) => active,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "could not read active version");
                return None;
            }
        };
        for retriever in &self.retrievers {
            if retriever.has_index(&active) {
                continue;
            }
            if let Err(e) = retriever.load_index(&active).await {
                tracing::warn!(
                    index = %retriever.source(),
                    version = %active,
                    error = %e,
                    "could not load artifacts of the active version"
                );
            }
        }
        Some(active)
    }

    /// Drop in-memory indexes of every version other than `active` and
    /// `previous`. They can be loaded again on demand.
    async fn release_indexes(&self, active: &str, previous: Option<&str>) {
        let versions = match self.versions.list_versions().await {
            Ok(versions) => versions,
            Err(e) => {
                tracing::warn!(error = %e, "could not list versions to release indexes");
                return;
            }
        };
        let mut released = 0usize;
        for s in versions {
            let id = s.version.version_id.as_str();
            if id == active || Some(id) == previous {
                continue;
            }
            for retriever in &self.retrievers {
                if retriever.has_index(id) {
                    retriever.drop_index(id);
                    released += 1;
                }
            }
        }
        if released > 0 {
            tracing::debug!(released, "released stale indexes");
        }
    }

    async fn discard(&self, version_id: &str) {
        for retriever in &self.retrievers {
            retriever.drop_index(version_id);
        }
        match self.versions.delete_version(version_id).await {
            Ok(_) => tracing::warn!(version = %version_id, "discarded unfinished version"),
            Err(e) => tracing::warn!(
                version = %version_id,
                error = %e,
                "failed to discard unfinished version"
            ),
        }
    }
}

/// Map raw records onto canonical products, without a version stamp.
///
/// Rows without an integer product id are skipped. When an id repeats,
/// the last row wins. Mapped columns missing from a record read as empty
/// strings; unmapped, non-null columns land in `attributes`.
pub fn canonicalize(records: &[RawRecord], columns: &ColumnMap) -> Vec<ProductCanonical> {
    let mut by_id: BTreeMap<i64, &RawRecord> = BTreeMap::new();
    let mut skipped = 0usize;
    for r in records {
        match r.get(&columns.product_id).and_then(ScalarValue::as_i64) {
            Some(id) => {
                by_id.insert(id, r);
            }
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        tracing::warn!(skipped, column = %columns.product_id, "records without a product id");
    }

    let rows: Vec<(i64, &RawRecord)> = by_id.into_iter().collect();
    let text = |col: &str| -> Vec<String> {
        rows.iter()
            .map(|(_, r)| r.get(col).map(ScalarValue::as_text).unwrap_or_default())
            .collect()
    };

    let names_raw = text(&columns.name);
    let names = normalize_batch(&names_raw);
    let brands = normalize_batch(&text(&columns.brand));
    let departments = normalize_batch(&text(&columns.department));
    let categories = normalize_batch(&text(&columns.category));
    let subcategories = normalize_batch(&text(&columns.subcategory));

    let mapped = columns.mapped();
    let now = Utc::now();

    rows.iter()
        .enumerate()
        .map(|(i, (id, record))| {
            let attributes: Attributes = record
                .iter()
                .filter(|(k, v)| !mapped.contains(&k.as_str()) && !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let updated_at = record
                .get(&columns.updated_at)
                .and_then(parse_timestamp)
                .unwrap_or(now);

            let mut product = ProductCanonical {
                product_id: *id,
                name_raw: names_raw[i].clone(),
                name_canonical: names[i].clone(),
                brand: brands[i].clone(),
                department: departments[i].clone(),
                category: categories[i].clone(),
                subcategory: subcategories[i].clone(),
                attributes,
                status: ProductStatus::Active,
                searchable_text: String::new(),
                catalog_version: String::new(),
                updated_at,
            };
            product.refresh_searchable_text();
            product
        })
        .collect()
}
