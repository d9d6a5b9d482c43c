//! Core data models used throughout Catalog Search.
//!
//! These types represent the raw records, canonical products, catalog
//! versions and per-query ranking artifacts that flow through the build
//! and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// A scalar cell value, used both for raw upstream records and for the
/// open attribute bag of a canonical product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ScalarValue {
    /// Text rendering used when a cell feeds a string field.
    ///
    /// `Null` renders as the empty string.
    pub fn as_text(&self) -> String {
        match self {
            ScalarValue::Null => String::new(),
            ScalarValue::Bool(b) => b.to_string(),
            ScalarValue::Integer(i) => i.to_string(),
            ScalarValue::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    format!("{}", *f as i64)
                } else {
                    f.to_string()
                }
            }
            ScalarValue::Text(s) => s.clone(),
        }
    }

    /// Integer view, accepting integral floats and numeric text.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ScalarValue::Integer(i) => Some(*i),
            ScalarValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            ScalarValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }
}

impl From<&str> for ScalarValue {
    fn from(s: &str) -> Self {
        ScalarValue::Text(s.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(s: String) -> Self {
        ScalarValue::Text(s)
    }
}

impl From<i64> for ScalarValue {
    fn from(i: i64) -> Self {
        ScalarValue::Integer(i)
    }
}

impl From<f64> for ScalarValue {
    fn from(f: f64) -> Self {
        ScalarValue::Float(f)
    }
}

/// Raw record produced by a source extractor, keyed by upstream column name.
pub type RawRecord = BTreeMap<String, ScalarValue>;

/// Open key-value bag for product metadata that has no dedicated field.
pub type Attributes = BTreeMap<String, ScalarValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Active,
    Inactive,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Active => "active",
            ProductStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("inactive") {
            ProductStatus::Inactive
        } else {
            ProductStatus::Active
        }
    }
}

/// Canonical product row, owned by exactly one catalog version.
///
/// `searchable_text` is derived from the normalized fields; build it with
/// [`ProductCanonical::derive_searchable_text`] and never edit it directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductCanonical {
    pub product_id: i64,
    pub name_raw: String,
    pub name_canonical: String,
    pub brand: String,
    pub department: String,
    pub category: String,
    pub subcategory: String,
    pub attributes: Attributes,
    pub status: ProductStatus,
    pub searchable_text: String,
    pub catalog_version: String,
    pub updated_at: DateTime<Utc>,
}

impl ProductCanonical {
    /// Concatenate the normalized name, brand and taxonomy fields,
    /// skipping empties and collapsing whitespace.
    pub fn derive_searchable_text(
        name_canonical: &str,
        brand: &str,
        department: &str,
        category: &str,
        subcategory: &str,
    ) -> String {
        [name_canonical, brand, department, category, subcategory]
            .iter()
            .flat_map(|field| field.split_whitespace())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Recompute `searchable_text` from the current normalized fields.
    pub fn refresh_searchable_text(&mut self) {
        self.searchable_text = Self::derive_searchable_text(
            &self.name_canonical,
            &self.brand,
            &self.department,
            &self.category,
            &self.subcategory,
        );
    }

    /// Taxonomy joined for display and for the lexical category field.
    pub fn category_path(&self) -> String {
        [
            self.department.as_str(),
            self.category.as_str(),
            self.subcategory.as_str(),
        ]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" > ")
    }

    /// SHA-256 of `searchable_text`, used to detect reusable embeddings.
    pub fn content_hash(&self) -> String {
        content_hash(&self.searchable_text)
    }
}

/// Hex SHA-256 of a text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Metadata for one immutable catalog build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogVersion {
    pub version_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalSource {
    Lexical,
    Vector,
}

impl fmt::Display for RetrievalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalSource::Lexical => write!(f, "lexical"),
            RetrievalSource::Vector => write!(f, "vector"),
        }
    }
}

/// One hit from a single retrieval path. Scores are path-specific.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedItem {
    pub product_id: i64,
    pub score: f64,
    pub source: RetrievalSource,
}

/// Per-candidate score breakdown.
///
/// `lexical` and `vector` hold raw path scores (0.0 when the path did not
/// return the candidate); `final_score` is the fused, boosted score.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankingScores {
    pub lexical: f64,
    pub vector: f64,
    pub rule_boost: f64,
    #[serde(rename = "final")]
    pub final_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedProduct {
    pub product: ProductCanonical,
    pub scores: RankingScores,
    pub rationale: String,
}

/// Caller-facing result shape. Raw index scores are not exposed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub product_id: i64,
    pub canonical_name: String,
    pub brand: String,
    pub category: String,
    pub final_score: f64,
    pub rationale: String,
}

impl From<&RankedProduct> for SearchHit {
    fn from(ranked: &RankedProduct) -> Self {
        Self {
            product_id: ranked.product.product_id,
            canonical_name: ranked.product.name_canonical.clone(),
            brand: ranked.product.brand.clone(),
            category: ranked.product.category_path(),
            final_score: ranked.scores.final_score,
            rationale: ranked.rationale.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_searchable_text_skips_empty_fields() {
        let text = ProductCanonical::derive_searchable_text("caneta  azul", "bic", "", "escrita", "");
        assert_eq!(text, "caneta azul bic escrita");
    }

    #[test]
    fn test_scalar_text_rendering() {
        assert_eq!(ScalarValue::Null.as_text(), "");
        assert_eq!(ScalarValue::Integer(42).as_text(), "42");
        assert_eq!(ScalarValue::Float(7.0).as_text(), "7");
        assert_eq!(ScalarValue::Text("x".into()).as_text(), "x");
    }

    #[test]
    fn test_scalar_as_i64() {
        assert_eq!(ScalarValue::Text(" 12 ".into()).as_i64(), Some(12));
        assert_eq!(ScalarValue::Float(3.0).as_i64(), Some(3));
        assert_eq!(ScalarValue::Float(3.5).as_i64(), None);
        assert_eq!(ScalarValue::Null.as_i64(), None);
    }

    #[test]
    fn test_scalar_json_untagged() {
        let attrs: Attributes = serde_json::from_str(r#"{"a":1,"b":"x","c":null,"d":1.5}"#).unwrap();
        assert_eq!(attrs["a"], ScalarValue::Integer(1));
        assert_eq!(attrs["b"], ScalarValue::Text("x".into()));
        assert_eq!(attrs["c"], ScalarValue::Null);
        assert_eq!(attrs["d"], ScalarValue::Float(1.5));
    }

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
    }
}
