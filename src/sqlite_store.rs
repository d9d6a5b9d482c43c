//! SQLite implementation of the catalog storage traits.
//!
//! One [`SqliteCatalog`] backs the version store, the product repository
//! and the vector artifact store. Activation and rollback each run in a
//! single transaction, and the pool is in WAL mode, so a concurrent reader
//! sees the active flag either before or after the swap.
//!
//! The first activation stamps `activated_at`; only stamped versions are
//! rollback targets.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use catalog_search_core::embedding::{blob_to_vec, vec_to_blob};
use catalog_search_core::models::{Attributes, CatalogVersion, ProductCanonical, ProductStatus};
use catalog_search_core::store::{
    rollback_target, ProductRepository, StoredVector, VectorArtifactStore, VersionStore,
    VersionSummary,
};

use crate::config::Config;
use crate::{db, migrate};

/// Rows per multi-row INSERT or IN (...) lookup.
const DEFAULT_BATCH: usize = 500;

const PRODUCT_COLUMNS: &str = "product_id, name_raw, name_canonical, brand, department, \
     category, subcategory, attributes_json, status, searchable_text, catalog_version, updated_at";

#[derive(Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
    batch_size: usize,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            batch_size: DEFAULT_BATCH,
        }
    }

    /// Connect using `[db]` settings and make sure the schema exists.
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        Ok(Self::new(pool).with_batch_size(config.builder.insert_batch_size))
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

fn row_to_version(row: &SqliteRow) -> CatalogVersion {
    CatalogVersion {
        version_id: row.get("version_id"),
        description: row.get("description"),
        created_at: millis_to_utc(row.get("created_at")),
        is_active: row.get::<i64, _>("is_active") != 0,
    }
}

fn row_to_product(row: &SqliteRow) -> Result<ProductCanonical> {
    let attributes_json: String = row.get("attributes_json");
    let attributes: Attributes = serde_json::from_str(&attributes_json)
        .with_context(|| "Failed to decode product attributes")?;
    let status: String = row.get("status");
    Ok(ProductCanonical {
        product_id: row.get("product_id"),
        name_raw: row.get("name_raw"),
        name_canonical: row.get("name_canonical"),
        brand: row.get("brand"),
        department: row.get("department"),
        category: row.get("category"),
        subcategory: row.get("subcategory"),
        attributes,
        status: ProductStatus::parse(&status),
        searchable_text: row.get("searchable_text"),
        catalog_version: row.get("catalog_version"),
        updated_at: millis_to_utc(row.get("updated_at")),
    })
}

/// Clear the active flag and set it on `version_id`, stamping its first
/// activation.
async fn swap_active(tx: &mut Transaction<'_, Sqlite>, version_id: &str) -> Result<()> {
    sqlx::query("UPDATE catalog_versions SET is_active = 0 WHERE is_active = 1")
        .execute(&mut **tx)
        .await?;
    sqlx::query(
        "UPDATE catalog_versions SET is_active = 1, activated_at = COALESCE(activated_at, ?) \
         WHERE version_id = ?",
    )
    .bind(Utc::now().timestamp_millis())
    .bind(version_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// ============ Version Store ============

#[async_trait]
impl VersionStore for SqliteCatalog {
    async fn create_version(&self, description: &str) -> Result<CatalogVersion> {
        let version = CatalogVersion {
            version_id: Uuid::new_v4().to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
            is_active: false,
        };
        sqlx::query(
            "INSERT INTO catalog_versions (version_id, description, created_at, is_active) \
             VALUES (?, ?, ?, 0)",
        )
        .bind(&version.version_id)
        .bind(&version.description)
        .bind(version.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(version)
    }

    async fn activate_version(&self, version_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let exists: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM catalog_versions WHERE version_id = ?")
                .bind(version_id)
                .fetch_one(&mut *tx)
                .await?;
        if exists == 0 {
            return Ok(false);
        }

        swap_active(&mut tx, version_id).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn get_active_version(&self) -> Result<Option<String>> {
        let active: Option<String> =
            sqlx::query_scalar("SELECT version_id FROM catalog_versions WHERE is_active = 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(active)
    }

    async fn rollback_to_previous(&self) -> Result<Option<String>> {
        let mut tx = self.pool.begin().await?;

        let published: Vec<String> = sqlx::query_scalar(
            "SELECT version_id FROM catalog_versions WHERE activated_at IS NOT NULL ORDER BY seq",
        )
        .fetch_all(&mut *tx)
        .await?;
        let active: Option<String> =
            sqlx::query_scalar("SELECT version_id FROM catalog_versions WHERE is_active = 1")
                .fetch_optional(&mut *tx)
                .await?;

        let Some(target) = rollback_target(&published, active.as_deref()).map(str::to_string)
        else {
            return Ok(None);
        };

        swap_active(&mut tx, &target).await?;
        tx.commit().await?;
        Ok(Some(target))
    }

    async fn list_versions(&self) -> Result<Vec<VersionSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT v.version_id, v.description, v.created_at, v.is_active,
                   (SELECT COUNT(*) FROM products p WHERE p.catalog_version = v.version_id)
                       AS product_count
            FROM catalog_versions v
            ORDER BY v.seq DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| VersionSummary {
                version: row_to_version(row),
                product_count: row.get::<i64, _>("product_count") as usize,
            })
            .collect())
    }

    async fn delete_version(&self, version_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let is_active: Option<i64> =
            sqlx::query_scalar("SELECT is_active FROM catalog_versions WHERE version_id = ?")
                .bind(version_id)
                .fetch_optional(&mut *tx)
                .await?;
        match is_active {
            None | Some(1) => return Ok(false),
            Some(_) => {}
        }

        sqlx::query("DELETE FROM product_vectors WHERE catalog_version = ?")
            .bind(version_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM products WHERE catalog_version = ?")
            .bind(version_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM catalog_versions WHERE version_id = ?")
            .bind(version_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}

// ============ Product Repository ============

#[async_trait]
impl ProductRepository for SqliteCatalog {
    async fn insert_products(
        &self,
        version_id: &str,
        products: &[ProductCanonical],
    ) -> Result<usize> {
        if let Some(p) = products.iter().find(|p| p.catalog_version != version_id) {
            bail!(
                "product {} is stamped with version {}, expected {}",
                p.product_id,
                p.catalog_version,
                version_id
            );
        }

        let mut tx = self.pool.begin().await?;

        let exists: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM catalog_versions WHERE version_id = ?")
                .bind(version_id)
                .fetch_one(&mut *tx)
                .await?;
        if exists == 0 {
            bail!("unknown catalog version: {}", version_id);
        }
        let populated: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE catalog_version = ?")
                .bind(version_id)
                .fetch_one(&mut *tx)
                .await?;
        if populated > 0 {
            bail!("catalog version {} is already populated", version_id);
        }

        let encoded: Vec<String> = products
            .iter()
            .map(|p| serde_json::to_string(&p.attributes))
            .collect::<std::result::Result<_, _>>()?;

        for (chunk, attrs) in products
            .chunks(self.batch_size)
            .zip(encoded.chunks(self.batch_size))
        {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("INSERT INTO products ({}) ", PRODUCT_COLUMNS));
            qb.push_values(chunk.iter().zip(attrs), |mut b, (p, attrs_json)| {
                b.push_bind(p.product_id)
                    .push_bind(&p.name_raw)
                    .push_bind(&p.name_canonical)
                    .push_bind(&p.brand)
                    .push_bind(&p.department)
                    .push_bind(&p.category)
                    .push_bind(&p.subcategory)
                    .push_bind(attrs_json)
                    .push_bind(p.status.as_str())
                    .push_bind(&p.searchable_text)
                    .push_bind(&p.catalog_version)
                    .push_bind(p.updated_at.timestamp_millis());
            });
            qb.build()
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to insert products into {}", version_id))?;
        }

        tx.commit().await?;
        Ok(products.len())
    }

    async fn get_products(&self, version_id: &str, ids: &[i64]) -> Result<Vec<ProductCanonical>> {
        let mut out = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.batch_size) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                "SELECT {} FROM products WHERE catalog_version = ",
                PRODUCT_COLUMNS
            ));
            qb.push_bind(version_id);
            qb.push(" AND product_id IN (");
            let mut sep = qb.separated(", ");
            for id in chunk {
                sep.push_bind(*id);
            }
            sep.push_unseparated(")");

            let rows = qb.build().fetch_all(&self.pool).await?;
            for row in &rows {
                out.push(row_to_product(row)?);
            }
        }
        Ok(out)
    }

    async fn list_products(&self, version_id: &str) -> Result<Vec<ProductCanonical>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM products WHERE catalog_version = ? ORDER BY product_id",
            PRODUCT_COLUMNS
        ))
        .bind(version_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_product).collect()
    }

    async fn count_products(&self, version_id: &str) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE catalog_version = ?")
            .bind(version_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}

// ============ Vector Artifacts ============

#[async_trait]
impl VectorArtifactStore for SqliteCatalog {
    async fn save_vectors(
        &self,
        version_id: &str,
        model: &str,
        vectors: &[StoredVector],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM product_vectors WHERE catalog_version = ? AND model = ?")
            .bind(version_id)
            .bind(model)
            .execute(&mut *tx)
            .await?;

        for chunk in vectors.chunks(self.batch_size) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO product_vectors \
                 (catalog_version, product_id, model, content_hash, dims, embedding) ",
            );
            qb.push_values(chunk, |mut b, v| {
                b.push_bind(version_id)
                    .push_bind(v.product_id)
                    .push_bind(model)
                    .push_bind(&v.content_hash)
                    .push_bind(v.embedding.len() as i64)
                    .push_bind(vec_to_blob(&v.embedding));
            });
            qb.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_vectors(&self, version_id: &str, model: &str) -> Result<Vec<StoredVector>> {
        let rows = sqlx::query(
            "SELECT product_id, content_hash, embedding FROM product_vectors \
             WHERE catalog_version = ? AND model = ? ORDER BY product_id",
        )
        .bind(version_id)
        .bind(model)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                StoredVector {
                    product_id: row.get("product_id"),
                    content_hash: row.get("content_hash"),
                    embedding: blob_to_vec(&blob),
                }
            })
            .collect())
    }

    async fn delete_vectors(&self, version_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM product_vectors WHERE catalog_version = ?")
            .bind(version_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
