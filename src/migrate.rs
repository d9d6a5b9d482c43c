use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes. Safe to run repeatedly.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // `seq` orders versions by creation even when timestamps collide
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog_versions (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            version_id TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0,
            activated_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Databases created before `activated_at` existed
    let has_activated_at: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('catalog_versions') WHERE name = 'activated_at'",
    )
    .fetch_one(pool)
    .await?;
    if has_activated_at == 0 {
        sqlx::query("ALTER TABLE catalog_versions ADD COLUMN activated_at INTEGER")
            .execute(pool)
            .await?;
        sqlx::query(
            "UPDATE catalog_versions SET activated_at = created_at \
             WHERE version_id IN (SELECT DISTINCT catalog_version FROM products)",
        )
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS products (
            catalog_version TEXT NOT NULL,
            product_id INTEGER NOT NULL,
            name_raw TEXT NOT NULL,
            name_canonical TEXT NOT NULL,
            brand TEXT NOT NULL,
            department TEXT NOT NULL,
            category TEXT NOT NULL,
            subcategory TEXT NOT NULL,
            attributes_json TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL,
            searchable_text TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (catalog_version, product_id),
            FOREIGN KEY (catalog_version) REFERENCES catalog_versions(version_id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS product_vectors (
            catalog_version TEXT NOT NULL,
            product_id INTEGER NOT NULL,
            model TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (catalog_version, model, product_id),
            FOREIGN KEY (catalog_version) REFERENCES catalog_versions(version_id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one active version, enforced by the database as well
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_catalog_versions_single_active \
         ON catalog_versions(is_active) WHERE is_active = 1",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_product_vectors_hash ON product_vectors(model, content_hash)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
