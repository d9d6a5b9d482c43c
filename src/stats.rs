//! `catalog stats`: what is stored and what is serving.

use anyhow::Result;

use catalog_search_core::store::VersionStore;

use crate::config::Config;
use crate::sqlite_store::SqliteCatalog;

pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteCatalog::connect(config).await?;
    let pool = store.pool();

    let total_versions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM catalog_versions")
        .fetch_one(pool)
        .await?;
    let total_products: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
        .fetch_one(pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Catalog Search: Database Stats");
    println!("==============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Versions:    {}", total_versions);
    println!("  Rows:        {} (all versions)", total_products);
    println!();

    match store.get_active_version().await? {
        Some(active) => {
            let products: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM products WHERE catalog_version = ?",
            )
            .bind(&active)
            .fetch_one(pool)
            .await?;
            let vector_rows = sqlx::query_as::<_, (String, i64)>(
                "SELECT model, COUNT(*) FROM product_vectors WHERE catalog_version = ? \
                 GROUP BY model ORDER BY model",
            )
            .bind(&active)
            .fetch_all(pool)
            .await?;

            println!("  Active:      {}", active);
            println!("  Products:    {}", products);
            if vector_rows.is_empty() {
                println!("  Vectors:     none");
            }
            for (model, count) in &vector_rows {
                println!(
                    "  Vectors:     {} / {} ({}%) [{}]",
                    count,
                    products,
                    if products > 0 { count * 100 / products } else { 0 },
                    model
                );
            }
        }
        None => println!("  Active:      none"),
    }
    println!();

    store.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
