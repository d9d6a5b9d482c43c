//! Version-scoped dense vector index with exact cosine search.
//!
//! Every product's `searchable_text` is embedded once per version and kept
//! L2-normalized, so similarity is a plain dot product. Vectors are
//! persisted through a [`VectorArtifactStore`] when one is attached, which
//! lets a fresh process load a version without re-embedding it.
//!
//! A rebuild reuses any vector already held in memory whose content hash
//! (and, implicitly, model) matches, so an unchanged product is never
//! embedded twice. Only the matching vectors are copied.
//!
//! Hashing, reuse lookup and the similarity scan run on tokio's blocking
//! pool, so a caller's timeout can abandon a slow scan.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use rayon::prelude::*;

use crate::embedding::{embed_one, l2_norm, l2_normalize, EmbeddingProvider};
use crate::models::{content_hash, ProductCanonical, RetrievalSource, RetrievedItem};
use crate::normalize::normalize;
use crate::retriever::{rank_items, Retriever};
use crate::store::{StoredVector, VectorArtifactStore};

/// Segments at or above this size are scored on the rayon pool.
const PARALLEL_SCAN_THRESHOLD: usize = 4096;

const DEFAULT_BATCH_SIZE: usize = 64;

struct VectorSegment {
    entries: Vec<StoredVector>,
}

impl VectorSegment {
    fn score(&self, query: &[f32]) -> Vec<(i64, f32)> {
        let dot = |e: &StoredVector| -> (i64, f32) {
            let s = e.embedding.iter().zip(query).map(|(a, b)| a * b).sum();
            (e.product_id, s)
        };
        if self.entries.len() >= PARALLEL_SCAN_THRESHOLD {
            self.entries.par_iter().map(dot).collect()
        } else {
            self.entries.iter().map(dot).collect()
        }
    }

    fn search(&self, query: &[f32], top_k: usize) -> Vec<RetrievedItem> {
        let mut items: Vec<RetrievedItem> = self
            .score(query)
            .into_iter()
            .map(|(product_id, s)| RetrievedItem {
                product_id,
                score: f64::from(s),
                source: RetrievalSource::Vector,
            })
            .collect();
        rank_items(&mut items);
        items.truncate(top_k);
        items
    }
}

/// Hash every text and copy the vectors `sources` already hold for it.
///
/// Returns one entry per input (empty embedding when nothing matched) and
/// the positions still to embed.
fn prepare_entries(
    sources: &[Arc<VectorSegment>],
    docs: Vec<(i64, String)>,
) -> (Vec<StoredVector>, Vec<usize>) {
    let mut known: HashMap<&str, &[f32]> = HashMap::new();
    for seg in sources {
        for e in &seg.entries {
            known
                .entry(e.content_hash.as_str())
                .or_insert(e.embedding.as_slice());
        }
    }

    let mut entries = Vec::with_capacity(docs.len());
    let mut pending = Vec::new();
    for (product_id, text) in docs {
        let hash = content_hash(&text);
        let embedding = match known.get(hash.as_str()) {
            Some(v) => v.to_vec(),
            None => {
                pending.push(entries.len());
                Vec::new()
            }
        };
        entries.push(StoredVector {
            product_id,
            content_hash: hash,
            embedding,
        });
    }
    (entries, pending)
}

/// In-process vector index, one segment per catalog version.
pub struct VectorIndex {
    provider: Arc<dyn EmbeddingProvider>,
    artifacts: Option<Arc<dyn VectorArtifactStore>>,
    batch_size: usize,
    segments: RwLock<HashMap<String, Arc<VectorSegment>>>,
}

impl VectorIndex {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            artifacts: None,
            batch_size: DEFAULT_BATCH_SIZE,
            segments: RwLock::new(HashMap::new()),
        }
    }

    /// Persist built vectors to, and load them from, `store`.
    pub fn with_artifacts(mut self, store: Arc<dyn VectorArtifactStore>) -> Self {
        self.artifacts = Some(store);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Number of vectors held for `version`.
    pub fn vector_count(&self, version: &str) -> usize {
        self.segments
            .read()
            .get(version)
            .map_or(0, |s| s.entries.len())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = self.provider.embed(texts).await?;
        if vectors.len() != texts.len() {
            bail!(
                "embedding provider returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            );
        }
        let dims = self.provider.dims();
        for v in vectors.iter_mut() {
            if v.len() != dims {
                bail!(
                    "embedding dimension mismatch: expected {}, got {}",
                    dims,
                    v.len()
                );
            }
            l2_normalize(v);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Retriever for VectorIndex {
    fn source(&self) -> RetrievalSource {
        RetrievalSource::Vector
    }

    async fn build_index(&self, records: &[ProductCanonical], version: &str) -> Result<()> {
        let started = Instant::now();
        let sources: Vec<Arc<VectorSegment>> = self.segments.read().values().cloned().collect();
        let docs: Vec<(i64, String)> = records
            .iter()
            .map(|r| (r.product_id, r.searchable_text.clone()))
            .collect();
        let (mut entries, pending) =
            tokio::task::spawn_blocking(move || prepare_entries(&sources, docs)).await?;
        let reused = records.len() - pending.len();

        for chunk in pending.chunks(self.batch_size) {
            let texts: Vec<String> = chunk
                .iter()
                .map(|&i| records[i].searchable_text.clone())
                .collect();
            let vectors = self.embed_batch(&texts).await?;
            for (&i, v) in chunk.iter().zip(vectors) {
                entries[i].embedding = v;
            }
        }

        if let Some(store) = &self.artifacts {
            store
                .save_vectors(version, self.provider.model_name(), &entries)
                .await?;
        }

        self.segments
            .write()
            .insert(version.to_string(), Arc::new(VectorSegment { entries }));

        tracing::info!(
            version,
            model = self.provider.model_name(),
            embedded = pending.len(),
            reused,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "vector index built"
        );
        Ok(())
    }

    async fn search(&self, query: &str, version: &str, top_k: usize) -> Result<Vec<RetrievedItem>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let segment = self.segments.read().get(version).cloned();
        let Some(segment) = segment else {
            tracing::debug!(version, "no vector index for version");
            return Ok(Vec::new());
        };
        let query = normalize(query);
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let mut q = embed_one(self.provider.as_ref(), &query).await?;
        if l2_norm(&q) <= f32::EPSILON {
            // Only stopwords, or nothing else the embedder keeps.
            tracing::debug!(version, "query has no embeddable content");
            return Ok(Vec::new());
        }
        l2_normalize(&mut q);

        let items = tokio::task::spawn_blocking(move || segment.search(&q, top_k)).await?;
        Ok(items)
    }

    fn has_index(&self, version: &str) -> bool {
        self.segments.read().contains_key(version)
    }

    fn drop_index(&self, version: &str) {
        self.segments.write().remove(version);
    }

    async fn load_index(&self, version: &str) -> Result<bool> {
        let Some(store) = &self.artifacts else {
            return Ok(false);
        };
        let entries = store
            .load_vectors(version, self.provider.model_name())
            .await?;
        if entries.is_empty() {
            return Ok(false);
        }
        let dims = self.provider.dims();
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != dims) {
            tracing::warn!(
                version,
                product_id = bad.product_id,
                expected = dims,
                got = bad.embedding.len(),
                "persisted vectors have the wrong dimension; ignoring them"
            );
            return Ok(false);
        }
        let count = entries.len();
        self.segments
            .write()
            .insert(version.to_string(), Arc::new(VectorSegment { entries }));
        tracing::info!(version, vectors = count, "vector index loaded");
        Ok(true)
    }
}
