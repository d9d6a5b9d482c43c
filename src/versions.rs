//! Version lifecycle commands: `active`, `versions`, `rollback`, `prune`.

use anyhow::Result;

use catalog_search_core::store::{prune_versions, VersionStore};

use crate::config::Config;
use crate::sqlite_store::SqliteCatalog;

pub async fn run_active(config: &Config) -> Result<()> {
    let store = SqliteCatalog::connect(config).await?;
    match store.get_active_version().await? {
        Some(v) => println!("{}", v),
        None => println!("No active catalog."),
    }
    store.close().await;
    Ok(())
}

pub async fn run_versions(config: &Config) -> Result<()> {
    let store = SqliteCatalog::connect(config).await?;
    let versions = store.list_versions().await?;

    if versions.is_empty() {
        println!("No catalog versions.");
        store.close().await;
        return Ok(());
    }

    println!(
        "  {:<38} {:<17} {:>9}  {:<6} {}",
        "VERSION", "CREATED", "PRODUCTS", "ACTIVE", "DESCRIPTION"
    );
    println!("  {}", "-".repeat(96));
    for s in &versions {
        println!(
            "  {:<38} {:<17} {:>9}  {:<6} {}",
            s.version.version_id,
            s.version.created_at.format("%Y-%m-%d %H:%M"),
            s.product_count,
            if s.version.is_active { "*" } else { "" },
            s.version.description
        );
    }

    store.close().await;
    Ok(())
}

pub async fn run_rollback(config: &Config) -> Result<()> {
    let store = SqliteCatalog::connect(config).await?;
    let previous = store.get_active_version().await?;
    let restored = store.rollback_to_previous().await?;
    store.close().await;

    match restored {
        Some(v) => {
            tracing::info!(from = ?previous, to = %v, "rolled back");
            println!("Rolled back to version {}.", v);
        }
        None => println!("No previous version to roll back to."),
    }
    Ok(())
}

/// Delete inactive versions beyond the newest `keep`; the active one always stays.
pub async fn run_prune(config: &Config, keep: usize) -> Result<()> {
    let store = SqliteCatalog::connect(config).await?;
    let deleted = prune_versions(&store, keep).await?;
    store.close().await;

    if deleted.is_empty() {
        println!("Nothing to prune.");
    } else {
        for v in &deleted {
            println!("  deleted {}", v);
        }
        println!("Pruned {} version(s).", deleted.len());
    }
    Ok(())
}
