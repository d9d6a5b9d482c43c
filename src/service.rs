//! Query-time entry point.
//!
//! [`SearchService::search_deep`] resolves the active version once, runs
//! lexical and vector retrieval as two independent tasks with their own
//! timeouts, and fuses whatever came back. Failures past this boundary
//! degrade to "no active catalog" or to fewer results; they never surface
//! as errors.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::task::JoinHandle;

use catalog_search_core::fusion::{FusionEngine, FusionWeights};
use catalog_search_core::models::{RankedProduct, RetrievedItem, SearchHit};
use catalog_search_core::retriever::Retriever;
use catalog_search_core::store::{ProductRepository, VersionStore};

use crate::config::RetrievalConfig;

/// Result of one deep search.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchOutcome {
    NoActiveCatalog,
    Ranked {
        version_id: String,
        products: Vec<RankedProduct>,
    },
}

impl SearchOutcome {
    pub fn products(&self) -> &[RankedProduct] {
        match self {
            SearchOutcome::NoActiveCatalog => &[],
            SearchOutcome::Ranked { products, .. } => products,
        }
    }

    /// Caller-facing hits; empty when there is no active catalog.
    pub fn into_hits(self) -> Vec<SearchHit> {
        self.products().iter().map(SearchHit::from).collect()
    }
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Each path fetches `top_k * candidate_multiplier` candidates.
    pub candidate_multiplier: usize,
    pub lexical_timeout: Duration,
    pub vector_timeout: Duration,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

impl From<&RetrievalConfig> for SearchOptions {
    fn from(r: &RetrievalConfig) -> Self {
        Self {
            candidate_multiplier: r.candidate_multiplier.max(1),
            lexical_timeout: Duration::from_millis(r.lexical_timeout_ms),
            vector_timeout: Duration::from_millis(r.vector_timeout_ms),
        }
    }
}

pub struct SearchService {
    versions: Arc<dyn VersionStore>,
    products: Arc<dyn ProductRepository>,
    lexical: Arc<dyn Retriever>,
    vector: Arc<dyn Retriever>,
    fusion: Arc<FusionEngine>,
    options: SearchOptions,
}

impl SearchService {
    pub fn new(
        versions: Arc<dyn VersionStore>,
        products: Arc<dyn ProductRepository>,
        lexical: Arc<dyn Retriever>,
        vector: Arc<dyn Retriever>,
        fusion: Arc<FusionEngine>,
        options: SearchOptions,
    ) -> Self {
        Self {
            versions,
            products,
            lexical,
            vector,
            fusion,
            options,
        }
    }

    /// Make the active version queryable after a process start.
    ///
    /// Returns the warmed version, or `None` when nothing is active.
    pub async fn warm(&self) -> Result<Option<String>> {
        let Some(active) = self.versions.get_active_version().await? else {
            return Ok(None);
        };
        for retriever in [&self.lexical, &self.vector] {
            retriever
                .ensure_index(&active, self.products.as_ref())
                .await?;
        }
        tracing::debug!(version = %active, "indexes warm");
        Ok(Some(active))
    }

    /// Hybrid search against the active catalog version.
    ///
    /// Returns at most `top_k` products. Fusion resolves up to its
    /// `max_resolved` cap, or `top_k` when that is larger.
    pub async fn search_deep(
        &self,
        query: &str,
        top_k: usize,
        weights: Option<FusionWeights>,
    ) -> SearchOutcome {
        let version = match self.versions.get_active_version().await {
            Ok(Some(v)) => v,
            Ok(None) => return SearchOutcome::NoActiveCatalog,
            Err(e) => {
                tracing::error!(error = %e, "could not resolve the active version");
                return SearchOutcome::NoActiveCatalog;
            }
        };

        if top_k == 0 || query.trim().is_empty() {
            return SearchOutcome::Ranked {
                version_id: version,
                products: Vec::new(),
            };
        }

        // Indexes released after a rebuild or a rollback load back here.
        for retriever in [&self.lexical, &self.vector] {
            if retriever.has_index(&version) {
                continue;
            }
            if let Err(e) = retriever
                .ensure_index(&version, self.products.as_ref())
                .await
            {
                tracing::warn!(
                    version = %version,
                    source = %retriever.source(),
                    error = %e,
                    "could not load index"
                );
            }
        }

        let pool = top_k.saturating_mul(self.options.candidate_multiplier);
        let lexical = spawn_path(
            self.lexical.clone(),
            query,
            &version,
            pool,
            self.options.lexical_timeout,
        );
        let vector = spawn_path(
            self.vector.clone(),
            query,
            &version,
            pool,
            self.options.vector_timeout,
        );
        let (lexical, vector) = tokio::join!(join_path(lexical), join_path(vector));

        let mut products = match self
            .fusion
            .fuse_top(
                self.products.as_ref(),
                &version,
                &lexical,
                &vector,
                query,
                weights,
                top_k,
            )
            .await
        {
            Ok(products) => products,
            Err(e) => {
                tracing::warn!(version = %version, error = %e, "fusion failed");
                Vec::new()
            }
        };
        products.truncate(top_k);

        tracing::debug!(
            version = %version,
            lexical = lexical.len(),
            vector = vector.len(),
            returned = products.len(),
            "search complete"
        );
        SearchOutcome::Ranked {
            version_id: version,
            products,
        }
    }

    /// [`search_deep`](Self::search_deep) flattened to caller-facing hits.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        weights: Option<FusionWeights>,
    ) -> Vec<SearchHit> {
        self.search_deep(query, top_k, weights).await.into_hits()
    }
}

/// Run one retrieval path on its own task, bounded by `timeout`.
///
/// Errors and timeouts both yield an empty list.
fn spawn_path(
    retriever: Arc<dyn Retriever>,
    query: &str,
    version: &str,
    pool: usize,
    timeout: Duration,
) -> JoinHandle<Vec<RetrievedItem>> {
    let query = query.to_string();
    let version = version.to_string();
    tokio::spawn(async move {
        let source = retriever.source();
        match tokio::time::timeout(timeout, retriever.search(&query, &version, pool)).await {
            Ok(Ok(items)) => items,
            Ok(Err(e)) => {
                tracing::warn!(%source, error = %e, "retrieval failed");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(%source, timeout_ms = timeout.as_millis() as u64, "retrieval timed out");
                Vec::new()
            }
        }
    })
}

async fn join_path(handle: JoinHandle<Vec<RetrievedItem>>) -> Vec<RetrievedItem> {
    handle.await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "retrieval task aborted");
        Vec::new()
    })
}
