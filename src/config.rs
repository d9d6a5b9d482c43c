//! TOML configuration.
//!
//! Every section except `[db]` and `[source]` is optional; missing keys
//! fall back to the defaults below. [`load_config`] validates the result
//! before anything touches the database.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use catalog_search_core::fusion::FusionWeights;
use catalog_search_core::lexical::Bm25Params;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub lexical: Bm25Params,
    #[serde(default)]
    pub boosts: BoostsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub builder: BuilderConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub columns: ColumnMap,
}

/// Upstream column names mapped onto canonical fields.
#[derive(Debug, Deserialize, Clone)]
pub struct ColumnMap {
    #[serde(default = "default_col_product_id")]
    pub product_id: String,
    #[serde(default = "default_col_name")]
    pub name: String,
    #[serde(default = "default_col_brand")]
    pub brand: String,
    #[serde(default = "default_col_department")]
    pub department: String,
    #[serde(default = "default_col_category")]
    pub category: String,
    #[serde(default = "default_col_subcategory")]
    pub subcategory: String,
    #[serde(default = "default_col_updated_at")]
    pub updated_at: String,
}

fn default_col_product_id() -> String {
    "codprod".to_string()
}
fn default_col_name() -> String {
    "descricao".to_string()
}
fn default_col_brand() -> String {
    "marca".to_string()
}
fn default_col_department() -> String {
    "departamento".to_string()
}
fn default_col_category() -> String {
    "categoria".to_string()
}
fn default_col_subcategory() -> String {
    "subcategoria".to_string()
}
fn default_col_updated_at() -> String {
    "dt_atualizacao".to_string()
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            product_id: default_col_product_id(),
            name: default_col_name(),
            brand: default_col_brand(),
            department: default_col_department(),
            category: default_col_category(),
            subcategory: default_col_subcategory(),
            updated_at: default_col_updated_at(),
        }
    }
}

impl ColumnMap {
    /// Names of every mapped column, in canonical field order.
    pub fn mapped(&self) -> [&str; 7] {
        [
            &self.product_id,
            &self.name,
            &self.brand,
            &self.department,
            &self.category,
            &self.subcategory,
            &self.updated_at,
        ]
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default = "default_max_resolved")]
    pub max_resolved: usize,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_lexical_timeout_ms")]
    pub lexical_timeout_ms: u64,
    #[serde(default = "default_vector_timeout_ms")]
    pub vector_timeout_ms: u64,
}

fn default_lexical_weight() -> f64 {
    0.6
}
fn default_vector_weight() -> f64 {
    0.4
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_candidate_multiplier() -> usize {
    5
}
fn default_max_resolved() -> usize {
    50
}
fn default_top_k() -> usize {
    10
}
fn default_lexical_timeout_ms() -> u64 {
    2000
}
fn default_vector_timeout_ms() -> u64 {
    5000
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            lexical_weight: default_lexical_weight(),
            vector_weight: default_vector_weight(),
            rrf_k: default_rrf_k(),
            candidate_multiplier: default_candidate_multiplier(),
            max_resolved: default_max_resolved(),
            default_top_k: default_top_k(),
            lexical_timeout_ms: default_lexical_timeout_ms(),
            vector_timeout_ms: default_vector_timeout_ms(),
        }
    }
}

impl RetrievalConfig {
    pub fn weights(&self) -> FusionWeights {
        FusionWeights::new(self.lexical_weight, self.vector_weight)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BoostsConfig {
    #[serde(default = "default_brand_rule_boost")]
    pub brand_rule_boost: f64,
    #[serde(default = "default_brand_final_boost")]
    pub brand_final_boost: f64,
}

fn default_brand_rule_boost() -> f64 {
    0.10
}
fn default_brand_final_boost() -> f64 {
    0.005
}

impl Default for BoostsConfig {
    fn default() -> Self {
        Self {
            brand_rule_boost: default_brand_rule_boost(),
            brand_final_boost: default_brand_final_boost(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuilderConfig {
    #[serde(default = "default_insert_batch_size")]
    pub insert_batch_size: usize,
}

fn default_insert_batch_size() -> usize {
    500
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            insert_batch_size: default_insert_batch_size(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let r = &config.retrieval;
    if r.lexical_weight < 0.0 || r.vector_weight < 0.0 {
        bail!("retrieval weights must be >= 0");
    }
    if r.lexical_weight == 0.0 && r.vector_weight == 0.0 {
        bail!("retrieval.lexical_weight and retrieval.vector_weight cannot both be 0");
    }
    if r.rrf_k <= 0.0 {
        bail!("retrieval.rrf_k must be > 0");
    }
    if r.candidate_multiplier < 1 {
        bail!("retrieval.candidate_multiplier must be >= 1");
    }
    if r.max_resolved < 1 {
        bail!("retrieval.max_resolved must be >= 1");
    }
    if r.default_top_k < 1 {
        bail!("retrieval.default_top_k must be >= 1");
    }
    if r.lexical_timeout_ms == 0 || r.vector_timeout_ms == 0 {
        bail!("retrieval timeouts must be > 0");
    }

    let l = &config.lexical;
    if l.k1 < 0.0 || !(0.0..=1.0).contains(&l.b) {
        bail!("lexical.k1 must be >= 0 and lexical.b in [0.0, 1.0]");
    }

    if config.builder.insert_batch_size == 0 {
        bail!("builder.insert_batch_size must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }

    match config.embedding.provider.as_str() {
        "hash" | "local" => {}
        "openai" => {
            if config.embedding.model.is_none() || config.embedding.dims.is_none() {
                bail!("embedding.model and embedding.dims must be specified when provider is 'openai'");
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hash, local, or openai.",
            other
        ),
    }

    Ok(())
}
