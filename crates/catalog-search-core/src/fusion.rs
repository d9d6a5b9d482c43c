//! Weighted reciprocal rank fusion with business-rule boosts.
//!
//! Each retrieval path contributes `weight / (rank + k)` per item, with
//! 1-based ranks and `k = 60` by default. Contributions accumulate per
//! product into `RankingScores::final_score`, and each path's raw score is
//! kept alongside for explanation.
//!
//! After the base fusion every candidate is resolved against the
//! [`ProductRepository`] in one batch, the ordered [`BoostRule`] list is
//! applied, and the list is re-sorted (final score descending, lower
//! product id first on ties) and capped.

use std::collections::HashMap;

use anyhow::Result;
use serde::Deserialize;

use crate::models::{ProductCanonical, RankedProduct, RankingScores, RetrievedItem};
use crate::normalize::{contains_phrase, normalize};
use crate::store::ProductRepository;

/// Per-path fusion weights.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct FusionWeights {
    pub lexical: f64,
    pub vector: f64,
}

impl FusionWeights {
    /// Negative or non-finite weights are treated as zero.
    pub fn new(lexical: f64, vector: f64) -> Self {
        let clamp = |w: f64| if w.is_finite() { w.max(0.0) } else { 0.0 };
        Self {
            lexical: clamp(lexical),
            vector: clamp(vector),
        }
    }
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            lexical: 0.6,
            vector: 0.4,
        }
    }
}

/// A score adjustment granted by one business rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Boost {
    /// Added to `RankingScores::rule_boost`.
    pub rule_boost: f64,
    /// Added to `RankingScores::final_score`.
    pub final_boost: f64,
    pub reason: String,
}

/// A deterministic post-fusion adjustment.
pub trait BoostRule: Send + Sync {
    fn name(&self) -> &str;
    /// `query` is already normalized.
    fn apply(&self, query: &str, product: &ProductCanonical) -> Option<Boost>;
}

/// Boosts products whose brand appears as a whole phrase in the query.
#[derive(Debug, Clone)]
pub struct BrandMentionBoost {
    pub rule_boost: f64,
    pub final_boost: f64,
}

impl Default for BrandMentionBoost {
    fn default() -> Self {
        Self {
            rule_boost: 0.10,
            final_boost: 0.005,
        }
    }
}

impl BoostRule for BrandMentionBoost {
    fn name(&self) -> &str {
        "brand_mention"
    }

    fn apply(&self, query: &str, product: &ProductCanonical) -> Option<Boost> {
        if product.brand.is_empty() || !contains_phrase(query, &product.brand) {
            return None;
        }
        Some(Boost {
            rule_boost: self.rule_boost,
            final_boost: self.final_boost,
            reason: format!("brand '{}' in query", product.brand),
        })
    }
}

/// A fused candidate before repository resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub product_id: i64,
    pub scores: RankingScores,
    pub lexical_rank: Option<usize>,
    pub vector_rank: Option<usize>,
}

/// Fusion configuration plus the ordered boost rule list.
pub struct FusionEngine {
    rrf_k: f64,
    max_resolved: usize,
    default_weights: FusionWeights,
    rules: Vec<Box<dyn BoostRule>>,
}

impl FusionEngine {
    pub const DEFAULT_RRF_K: f64 = 60.0;
    pub const DEFAULT_MAX_RESOLVED: usize = 50;

    pub fn new(rrf_k: f64, max_resolved: usize, default_weights: FusionWeights) -> Self {
        Self {
            rrf_k,
            max_resolved,
            default_weights,
            rules: Vec::new(),
        }
    }

    /// Append a rule; rules run in insertion order.
    pub fn with_rule(mut self, rule: impl BoostRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn default_weights(&self) -> FusionWeights {
        self.default_weights
    }

    /// Base reciprocal rank fusion, sorted but neither resolved nor boosted.
    ///
    /// Inputs are ranked lists, best first. A product repeated within one
    /// list only counts at its best rank.
    pub fn combine(
        &self,
        lexical: &[RetrievedItem],
        vector: &[RetrievedItem],
        weights: FusionWeights,
    ) -> Vec<Candidate> {
        let mut by_id: HashMap<i64, Candidate> = HashMap::new();

        for (i, item) in lexical.iter().enumerate() {
            let c = by_id.entry(item.product_id).or_insert_with(|| empty(item.product_id));
            if c.lexical_rank.is_none() {
                let rank = i + 1;
                c.lexical_rank = Some(rank);
                c.scores.lexical = item.score;
                c.scores.final_score += weights.lexical / (rank as f64 + self.rrf_k);
            }
        }
        for (i, item) in vector.iter().enumerate() {
            let c = by_id.entry(item.product_id).or_insert_with(|| empty(item.product_id));
            if c.vector_rank.is_none() {
                let rank = i + 1;
                c.vector_rank = Some(rank);
                c.scores.vector = item.score;
                c.scores.final_score += weights.vector / (rank as f64 + self.rrf_k);
            }
        }

        let mut out: Vec<Candidate> = by_id.into_values().collect();
        out.sort_by(|a, b| order(a.product_id, &a.scores, b.product_id, &b.scores));
        out
    }

    /// Fuse two ranked lists into resolved, boosted and explained products.
    ///
    /// Candidates missing from `version` in the repository are dropped.
    /// At most `max_resolved` products come back.
    pub async fn fuse(
        &self,
        repo: &dyn ProductRepository,
        version: &str,
        lexical: &[RetrievedItem],
        vector: &[RetrievedItem],
        query: &str,
        weights: Option<FusionWeights>,
    ) -> Result<Vec<RankedProduct>> {
        self.fuse_top(repo, version, lexical, vector, query, weights, 0)
            .await
    }

    /// Like [`fuse`](Self::fuse), but keeps at least `top_k` products when
    /// `top_k` exceeds `max_resolved`.
    #[allow(clippy::too_many_arguments)]
    pub async fn fuse_top(
        &self,
        repo: &dyn ProductRepository,
        version: &str,
        lexical: &[RetrievedItem],
        vector: &[RetrievedItem],
        query: &str,
        weights: Option<FusionWeights>,
        top_k: usize,
    ) -> Result<Vec<RankedProduct>> {
        let weights = weights.unwrap_or(self.default_weights);
        let candidates = self.combine(lexical, vector, weights);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = candidates.iter().map(|c| c.product_id).collect();
        let mut products: HashMap<i64, ProductCanonical> = repo
            .get_products(version, &ids)
            .await?
            .into_iter()
            .map(|p| (p.product_id, p))
            .collect();

        let query = normalize(query);
        let mut ranked = Vec::with_capacity(candidates.len());
        let mut dropped = 0usize;

        for mut c in candidates {
            let Some(product) = products.remove(&c.product_id) else {
                dropped += 1;
                continue;
            };
            let mut reasons = Vec::new();
            for rule in &self.rules {
                if let Some(b) = rule.apply(&query, &product) {
                    c.scores.rule_boost += b.rule_boost;
                    c.scores.final_score += b.final_boost;
                    reasons.push(format!("{} (+{:.4})", b.reason, b.final_boost));
                }
            }
            let rationale = rationale(&c, &reasons);
            ranked.push(RankedProduct {
                product,
                scores: c.scores,
                rationale,
            });
        }

        if dropped > 0 {
            tracing::debug!(version, dropped, "candidates without a canonical record");
        }

        ranked.sort_by(|a, b| {
            order(
                a.product.product_id,
                &a.scores,
                b.product.product_id,
                &b.scores,
            )
        });
        ranked.truncate(self.max_resolved.max(top_k));
        Ok(ranked)
    }
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_RRF_K,
            Self::DEFAULT_MAX_RESOLVED,
            FusionWeights::default(),
        )
        .with_rule(BrandMentionBoost::default())
    }
}

fn empty(product_id: i64) -> Candidate {
    Candidate {
        product_id,
        scores: RankingScores::default(),
        lexical_rank: None,
        vector_rank: None,
    }
}

fn order(
    a_id: i64,
    a: &RankingScores,
    b_id: i64,
    b: &RankingScores,
) -> std::cmp::Ordering {
    b.final_score
        .total_cmp(&a.final_score)
        .then(a_id.cmp(&b_id))
}

fn rationale(c: &Candidate, reasons: &[String]) -> String {
    let mut parts = Vec::new();
    if let Some(r) = c.lexical_rank {
        parts.push(format!("lexical #{} ({:.3})", r, c.scores.lexical));
    }
    if let Some(r) = c.vector_rank {
        parts.push(format!("vector #{} ({:.3})", r, c.scores.vector));
    }
    let mut s = parts.join(" + ");
    if !reasons.is_empty() {
        s.push_str("; ");
        s.push_str(&reasons.join("; "));
    }
    s.push_str(&format!("; final {:.4}", c.scores.final_score));
    s
}

/// Fuse with the default engine (RRF k = 60, brand boost, cap 50).
pub async fn fuse(
    repo: &dyn ProductRepository,
    version: &str,
    lexical: &[RetrievedItem],
    vector: &[RetrievedItem],
    query: &str,
    weights: Option<FusionWeights>,
) -> Result<Vec<RankedProduct>> {
    FusionEngine::default()
        .fuse(repo, version, lexical, vector, query, weights)
        .await
}
