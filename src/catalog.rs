//! Process-wide wiring.
//!
//! [`Catalog::open`] turns a [`Config`] into the one set of shared
//! components every command needs: the SQLite store (implementing all three
//! storage traits), both indexes, the fusion engine, the builder and the
//! search service. Indexes are shared between the builder and the service
//! so a rebuild in this process is immediately searchable.

use std::sync::Arc;

use anyhow::Result;

use catalog_search_core::fusion::{BrandMentionBoost, FusionEngine};
use catalog_search_core::lexical::LexicalIndex;
use catalog_search_core::retriever::Retriever;
use catalog_search_core::store::prune_versions;
use catalog_search_core::vector::VectorIndex;

use crate::builder::CatalogBuilder;
use crate::config::Config;
use crate::embedding::create_provider;
use crate::extract::ParquetExtractor;
use crate::service::{SearchOptions, SearchService};
use crate::sqlite_store::SqliteCatalog;

pub struct Catalog {
    pub store: Arc<SqliteCatalog>,
    pub lexical: Arc<LexicalIndex>,
    pub vector: Arc<VectorIndex>,
    pub builder: CatalogBuilder,
    pub service: SearchService,
}

impl Catalog {
    pub async fn open(config: &Config) -> Result<Self> {
        let store = Arc::new(SqliteCatalog::connect(config).await?);
        let provider = create_provider(&config.embedding)?;

        let lexical = Arc::new(LexicalIndex::new(config.lexical.clone()));
        let vector = Arc::new(
            VectorIndex::new(provider)
                .with_artifacts(store.clone())
                .with_batch_size(config.embedding.batch_size),
        );
        let fusion = Arc::new(fusion_engine(config));

        let source = Arc::new(ParquetExtractor::new(
            config.source.path.clone(),
            config.source.columns.updated_at.clone(),
        ));
        let builder = CatalogBuilder::new(
            store.clone(),
            store.clone(),
            source,
            config.source.columns.clone(),
        )
        .with_retriever(lexical.clone() as Arc<dyn Retriever>)
        .with_retriever(vector.clone() as Arc<dyn Retriever>);

        let service = SearchService::new(
            store.clone(),
            store.clone(),
            lexical.clone(),
            vector.clone(),
            fusion,
            SearchOptions::from(&config.retrieval),
        );

        tracing::debug!(
            db = %config.db.path.display(),
            model = vector.model_name(),
            "catalog opened"
        );
        Ok(Self {
            store,
            lexical,
            vector,
            builder,
            service,
        })
    }

    /// Delete inactive versions beyond the newest `keep` and drop their
    /// in-memory indexes.
    pub async fn prune(&self, keep: usize) -> Result<Vec<String>> {
        let removed = prune_versions(self.store.as_ref(), keep).await?;
        for version in &removed {
            self.lexical.drop_index(version);
            self.vector.drop_index(version);
        }
        Ok(removed)
    }

    pub async fn close(&self) {
        self.store.close().await;
    }
}

/// Fusion engine from `[retrieval]` and `[boosts]`.
pub fn fusion_engine(config: &Config) -> FusionEngine {
    FusionEngine::new(
        config.retrieval.rrf_k,
        config.retrieval.max_resolved,
        config.retrieval.weights(),
    )
    .with_rule(BrandMentionBoost {
        rule_boost: config.boosts.brand_rule_boost,
        final_boost: config.boosts.brand_final_boost,
    })
}
