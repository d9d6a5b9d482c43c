//! `catalog search`: hybrid search from the command line.

use anyhow::Result;

use catalog_search_core::fusion::FusionWeights;
use catalog_search_core::models::SearchHit;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::service::SearchOutcome;

/// Resolve per-request weights: either flag overrides its side, the other
/// side keeps the configured value.
pub fn resolve_weights(
    config: &Config,
    lexical_weight: Option<f64>,
    vector_weight: Option<f64>,
) -> Option<FusionWeights> {
    if lexical_weight.is_none() && vector_weight.is_none() {
        return None;
    }
    let defaults = config.retrieval.weights();
    Some(FusionWeights::new(
        lexical_weight.unwrap_or(defaults.lexical),
        vector_weight.unwrap_or(defaults.vector),
    ))
}

pub async fn run_search(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    lexical_weight: Option<f64>,
    vector_weight: Option<f64>,
    json: bool,
) -> Result<()> {
    let catalog = Catalog::open(config).await?;
    catalog.service.warm().await?;

    let top_k = top_k.unwrap_or(config.retrieval.default_top_k);
    let weights = resolve_weights(config, lexical_weight, vector_weight);
    let outcome = catalog.service.search_deep(query, top_k, weights).await;

    if json {
        let hits: Vec<SearchHit> = outcome.into_hits();
        println!("{}", serde_json::to_string_pretty(&hits)?);
        catalog.close().await;
        return Ok(());
    }

    let (version_id, products) = match &outcome {
        SearchOutcome::NoActiveCatalog => {
            println!("No active catalog.");
            catalog.close().await;
            return Ok(());
        }
        SearchOutcome::Ranked {
            version_id,
            products,
        } => (version_id, products),
    };

    if products.is_empty() {
        println!("No results.");
        catalog.close().await;
        return Ok(());
    }

    println!("Catalog version {}", version_id);
    println!();
    for (i, ranked) in products.iter().enumerate() {
        let p = &ranked.product;
        let brand = if p.brand.is_empty() { "-" } else { &p.brand };
        println!(
            "{}. [{:.4}] {} ({})",
            i + 1,
            ranked.scores.final_score,
            p.name_canonical,
            brand
        );
        let category = p.category_path();
        if !category.is_empty() {
            println!("    category: {}", category);
        }
        println!("    why: {}", ranked.rationale);
        println!("    id: {}", p.product_id);
        println!();
    }

    catalog.close().await;
    Ok(())
}
