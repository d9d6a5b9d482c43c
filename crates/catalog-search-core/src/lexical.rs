//! Version-scoped BM25 inverted index over product fields.
//!
//! Each product contributes four fields: `searchable_text`, the canonical
//! name, the brand and the category path. Every field keeps its own
//! postings and length statistics; a document's score is the weighted sum
//! of its per-field BM25 scores:
//!
//! ```text
//! score(d, q) = Σ_f w_f · Σ_t idf_f(t) · tf·(k1 + 1) / (tf + k1·(1 − b + b·len/avg_len))
//! idf_f(t)    = ln(1 + (N − df + 0.5) / (df + 0.5))
//! ```
//!
//! Segments are built and scored on tokio's blocking pool and swapped in
//! with one short write. A rebuild never blocks queries against other
//! versions, and a caller's timeout can abandon a slow scan.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;

use crate::models::{ProductCanonical, RetrievalSource, RetrievedItem};
use crate::normalize::{tokenize, tokenize_batch};
use crate::retriever::{rank_items, Retriever};

/// BM25 tuning and per-field weights.
#[derive(Debug, Clone, Deserialize)]
pub struct Bm25Params {
    #[serde(default = "default_k1")]
    pub k1: f64,
    #[serde(default = "default_b")]
    pub b: f64,
    #[serde(default = "default_text_weight")]
    pub text_weight: f64,
    #[serde(default = "default_name_weight")]
    pub name_weight: f64,
    #[serde(default = "default_brand_weight")]
    pub brand_weight: f64,
    #[serde(default = "default_category_weight")]
    pub category_weight: f64,
}

fn default_k1() -> f64 {
    1.2
}
fn default_b() -> f64 {
    0.75
}
fn default_text_weight() -> f64 {
    1.0
}
fn default_name_weight() -> f64 {
    2.0
}
fn default_brand_weight() -> f64 {
    1.5
}
fn default_category_weight() -> f64 {
    0.5
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: default_k1(),
            b: default_b(),
            text_weight: default_text_weight(),
            name_weight: default_name_weight(),
            brand_weight: default_brand_weight(),
            category_weight: default_category_weight(),
        }
    }
}

#[derive(Debug, Default)]
struct FieldIndex {
    weight: f64,
    /// term -> (doc ordinal, term frequency)
    postings: HashMap<String, Vec<(u32, u32)>>,
    doc_lens: Vec<u32>,
    avg_len: f64,
}

impl FieldIndex {
    fn build(weight: f64, docs: Vec<Vec<String>>) -> Self {
        let mut postings: HashMap<String, Vec<(u32, u32)>> = HashMap::new();
        let mut doc_lens = Vec::with_capacity(docs.len());

        for (ord, tokens) in docs.into_iter().enumerate() {
            doc_lens.push(tokens.len() as u32);
            let mut tfs: HashMap<String, u32> = HashMap::new();
            for t in tokens {
                *tfs.entry(t).or_insert(0) += 1;
            }
            for (term, tf) in tfs {
                postings.entry(term).or_default().push((ord as u32, tf));
            }
        }

        let total: u64 = doc_lens.iter().map(|l| u64::from(*l)).sum();
        let avg_len = if doc_lens.is_empty() {
            0.0
        } else {
            total as f64 / doc_lens.len() as f64
        };

        Self {
            weight,
            postings,
            doc_lens,
            avg_len,
        }
    }

    fn accumulate(&self, terms: &[String], params: &Bm25Params, scores: &mut HashMap<u32, f64>) {
        if self.weight <= 0.0 || self.avg_len <= 0.0 {
            return;
        }
        let n = self.doc_lens.len() as f64;
        for term in terms {
            let Some(docs) = self.postings.get(term) else {
                continue;
            };
            let df = docs.len() as f64;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
            for &(ord, tf) in docs {
                let tf = f64::from(tf);
                let len = f64::from(self.doc_lens[ord as usize]);
                let norm = params.k1 * (1.0 - params.b + params.b * len / self.avg_len);
                let s = idf * tf * (params.k1 + 1.0) / (tf + norm);
                *scores.entry(ord).or_insert(0.0) += self.weight * s;
            }
        }
    }
}

#[derive(Debug)]
struct Segment {
    product_ids: Vec<i64>,
    fields: Vec<FieldIndex>,
}

impl Segment {
    /// Score every document matching `terms`, best first.
    fn search(&self, terms: &[String], params: &Bm25Params, top_k: usize) -> Vec<RetrievedItem> {
        let mut scores: HashMap<u32, f64> = HashMap::new();
        for field in &self.fields {
            field.accumulate(terms, params, &mut scores);
        }

        let mut items: Vec<RetrievedItem> = scores
            .into_iter()
            .filter(|(_, s)| *s > 0.0)
            .map(|(ord, score)| RetrievedItem {
                product_id: self.product_ids[ord as usize],
                score,
                source: RetrievalSource::Lexical,
            })
            .collect();
        rank_items(&mut items);
        items.truncate(top_k);
        items
    }
}

/// Owned field texts, so a segment can be built off the async runtime.
struct SegmentInput {
    product_ids: Vec<i64>,
    texts: Vec<String>,
    names: Vec<String>,
    brands: Vec<String>,
    categories: Vec<String>,
}

impl SegmentInput {
    fn from_records(records: &[ProductCanonical]) -> Self {
        Self {
            product_ids: records.iter().map(|r| r.product_id).collect(),
            texts: records.iter().map(|r| r.searchable_text.clone()).collect(),
            names: records.iter().map(|r| r.name_canonical.clone()).collect(),
            brands: records.iter().map(|r| r.brand.clone()).collect(),
            categories: records
                .iter()
                .map(|r| format!("{} {} {}", r.department, r.category, r.subcategory))
                .collect(),
        }
    }

    fn build(self, p: &Bm25Params) -> Segment {
        Segment {
            product_ids: self.product_ids,
            fields: vec![
                FieldIndex::build(p.text_weight, tokenize_batch(&self.texts, true)),
                FieldIndex::build(p.name_weight, tokenize_batch(&self.names, true)),
                FieldIndex::build(p.brand_weight, tokenize_batch(&self.brands, true)),
                FieldIndex::build(p.category_weight, tokenize_batch(&self.categories, true)),
            ],
        }
    }
}

/// In-process lexical index, one segment per catalog version.
pub struct LexicalIndex {
    params: Bm25Params,
    segments: RwLock<HashMap<String, Arc<Segment>>>,
}

impl LexicalIndex {
    pub fn new(params: Bm25Params) -> Self {
        Self {
            params,
            segments: RwLock::new(HashMap::new()),
        }
    }

    /// Number of documents indexed for `version`.
    pub fn doc_count(&self, version: &str) -> usize {
        self.segments
            .read()
            .get(version)
            .map_or(0, |s| s.product_ids.len())
    }
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self::new(Bm25Params::default())
    }
}

#[async_trait]
impl Retriever for LexicalIndex {
    fn source(&self) -> RetrievalSource {
        RetrievalSource::Lexical
    }

    async fn build_index(&self, records: &[ProductCanonical], version: &str) -> Result<()> {
        let started = Instant::now();
        let input = SegmentInput::from_records(records);
        let params = self.params.clone();
        let segment = tokio::task::spawn_blocking(move || input.build(&params)).await?;
        let terms = segment.fields[0].postings.len();
        self.segments
            .write()
            .insert(version.to_string(), Arc::new(segment));
        tracing::info!(
            version,
            docs = records.len(),
            terms,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "lexical index built"
        );
        Ok(())
    }

    async fn search(&self, query: &str, version: &str, top_k: usize) -> Result<Vec<RetrievedItem>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let Some(segment) = self.segments.read().get(version).cloned() else {
            tracing::debug!(version, "no lexical index for version");
            return Ok(Vec::new());
        };

        let mut terms = tokenize(query, true);
        terms.sort();
        terms.dedup();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let params = self.params.clone();
        let items =
            tokio::task::spawn_blocking(move || segment.search(&terms, &params, top_k)).await?;
        Ok(items)
    }

    fn has_index(&self, version: &str) -> bool {
        self.segments.read().contains_key(version)
    }

    fn drop_index(&self, version: &str) {
        self.segments.write().remove(version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProductStatus;
    use crate::normalize::normalize;
    use chrono::Utc;

    fn product(id: i64, name: &str, brand: &str, category: &str) -> ProductCanonical {
        let name_canonical = normalize(name);
        let brand = normalize(brand);
        let category = normalize(category);
        ProductCanonical {
            product_id: id,
            name_raw: name.to_string(),
            searchable_text: ProductCanonical::derive_searchable_text(
                &name_canonical,
                &brand,
                "",
                &category,
                "",
            ),
            name_canonical,
            brand,
            department: String::new(),
            category,
            subcategory: String::new(),
            attributes: Default::default(),
            status: ProductStatus::Active,
            catalog_version: "v1".into(),
            updated_at: Utc::now(),
        }
    }

    fn catalog() -> Vec<ProductCanonical> {
        vec![
            product(1, "Caneta Azul", "Bic", "Escrita"),
            product(2, "Lápis HB", "Faber-Castell", "Escrita"),
            product(3, "Caneta Vermelha", "Pilot", "Escrita"),
            product(4, "Caderno Universitário", "Tilibra", "Papelaria"),
        ]
    }

    async fn index() -> LexicalIndex {
        let idx = LexicalIndex::default();
        idx.build_index(&catalog(), "v1").await.unwrap();
        idx
    }

    #[tokio::test]
    async fn test_search_ranks_best_match_first() {
        let idx = index().await;
        let hits = idx.search("bic azul", "v1", 10).await.unwrap();
        assert_eq!(hits[0].product_id, 1);
        assert!(hits.iter().all(|h| h.source == RetrievalSource::Lexical));
        assert!(hits.iter().all(|h| h.product_id != 2));
    }

    #[tokio::test]
    async fn test_search_is_diacritic_insensitive() {
        let idx = index().await;
        let hits = idx.search("LAPIS", "v1", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].product_id, 2);
    }

    #[tokio::test]
    async fn test_search_respects_top_k_and_order() {
        let idx = index().await;
        let hits = idx.search("caneta escrita", "v1", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
        assert!(idx.search("caneta", "v1", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rare_term_outweighs_common_term() {
        let idx = index().await;
        let hits = idx.search("escrita vermelha", "v1", 10).await.unwrap();
        assert_eq!(hits[0].product_id, 3);
    }

    #[tokio::test]
    async fn test_missing_version_or_empty_query_is_empty() {
        let idx = index().await;
        assert!(idx.search("caneta", "v2", 10).await.unwrap().is_empty());
        assert!(idx.search("  de  ", "v1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_replaces_version_segment() {
        let idx = index().await;
        idx.build_index(&catalog()[..1], "v1").await.unwrap();
        assert_eq!(idx.doc_count("v1"), 1);
        assert!(idx.search("lapis", "v1", 10).await.unwrap().is_empty());
        idx.drop_index("v1");
        assert!(!idx.has_index("v1"));
    }

    #[tokio::test]
    async fn test_ties_break_by_product_id() {
        let idx = LexicalIndex::default();
        let docs = vec![
            product(9, "Borracha", "", ""),
            product(5, "Borracha", "", ""),
        ];
        idx.build_index(&docs, "v").await.unwrap();
        let hits = idx.search("borracha", "v", 10).await.unwrap();
        assert_eq!(
            hits.iter().map(|h| h.product_id).collect::<Vec<_>>(),
            vec![5, 9]
        );
    }
}
