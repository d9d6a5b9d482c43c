//! SQLite-backed storage: version lifecycle, product partitions and
//! vector artifacts.

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use catalog_search::db::connect_path;
use catalog_search::migrate::migrate_pool;
use catalog_search::sqlite_store::SqliteCatalog;
use catalog_search_core::models::{ProductCanonical, ProductStatus, ScalarValue};
use catalog_search_core::store::{
    prune_versions, ProductRepository, StoredVector, VectorArtifactStore, VersionStore,
};

async fn open() -> (TempDir, SqliteCatalog) {
    let tmp = TempDir::new().unwrap();
    let pool = connect_path(&tmp.path().join("data/catalog.sqlite"))
        .await
        .unwrap();
    migrate_pool(&pool).await.unwrap();
    (tmp, SqliteCatalog::new(pool).with_batch_size(2))
}

fn product(id: i64, name: &str, version: &str) -> ProductCanonical {
    let mut p = ProductCanonical {
        product_id: id,
        name_raw: name.to_string(),
        name_canonical: name.to_lowercase(),
        brand: "bic".to_string(),
        department: "papelaria".to_string(),
        category: String::new(),
        subcategory: String::new(),
        attributes: Default::default(),
        status: ProductStatus::Active,
        searchable_text: String::new(),
        catalog_version: version.to_string(),
        updated_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
    };
    p.refresh_searchable_text();
    p
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let (_tmp, store) = open().await;
    migrate_pool(store.pool()).await.unwrap();
    assert_eq!(store.get_active_version().await.unwrap(), None);
}

#[tokio::test]
async fn test_activation_keeps_a_single_active_version() {
    let (_tmp, store) = open().await;
    let a = store.create_version("a").await.unwrap();
    let b = store.create_version("b").await.unwrap();
    assert!(!a.is_active);

    assert!(store.activate_version(&a.version_id).await.unwrap());
    assert!(store.activate_version(&b.version_id).await.unwrap());
    assert!(!store.activate_version("missing").await.unwrap());

    let versions = store.list_versions().await.unwrap();
    let active: Vec<_> = versions.iter().filter(|s| s.version.is_active).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].version.version_id, b.version_id);
    // newest first
    assert_eq!(versions[0].version.version_id, b.version_id);
}

#[tokio::test]
async fn test_rollback_walks_back_by_creation_order() {
    let (_tmp, store) = open().await;
    let mut ids = Vec::new();
    for name in ["a", "b", "c"] {
        let v = store.create_version(name).await.unwrap().version_id;
        store.activate_version(&v).await.unwrap();
        ids.push(v);
    }

    assert_eq!(store.rollback_to_previous().await.unwrap(), Some(ids[1].clone()));
    assert_eq!(store.rollback_to_previous().await.unwrap(), Some(ids[0].clone()));
    // Nothing older: back to the second-most-recent.
    assert_eq!(store.rollback_to_previous().await.unwrap(), Some(ids[1].clone()));
    assert_eq!(store.get_active_version().await.unwrap(), Some(ids[1].clone()));
}

#[tokio::test]
async fn test_rollback_skips_unfinished_versions() {
    let (_tmp, store) = open().await;
    let a = store.create_version("a").await.unwrap().version_id;
    store.activate_version(&a).await.unwrap();
    let unfinished = store.create_version("b").await.unwrap().version_id;
    let c = store.create_version("c").await.unwrap().version_id;
    store.activate_version(&c).await.unwrap();

    let restored = store.rollback_to_previous().await.unwrap();
    assert_eq!(restored, Some(a.clone()));
    assert_ne!(restored, Some(unfinished));
    assert_eq!(store.get_active_version().await.unwrap(), Some(a));
}

#[tokio::test]
async fn test_rollback_needs_two_published_versions() {
    let (_tmp, store) = open().await;
    assert_eq!(store.rollback_to_previous().await.unwrap(), None);

    let a = store.create_version("a").await.unwrap().version_id;
    let b = store.create_version("b").await.unwrap().version_id;
    // Neither was ever activated
    assert_eq!(store.rollback_to_previous().await.unwrap(), None);
    assert_eq!(store.get_active_version().await.unwrap(), None);

    store.activate_version(&a).await.unwrap();
    store.activate_version(&b).await.unwrap();
    assert_eq!(store.rollback_to_previous().await.unwrap(), Some(a.clone()));
    // Two versions exist, so a second rollback still answers.
    assert_eq!(store.rollback_to_previous().await.unwrap(), Some(a));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_readers_see_exactly_one_active_version() {
    let (_tmp, store) = open().await;
    let mut ids = Vec::new();
    for name in ["a", "b", "c"] {
        let v = store.create_version(name).await.unwrap().version_id;
        store.activate_version(&v).await.unwrap();
        ids.push(v);
    }

    let writer = {
        let store = store.clone();
        tokio::spawn(async move {
            for i in 0..200 {
                assert!(store.activate_version(&ids[i % 3]).await.unwrap());
                assert!(store.rollback_to_previous().await.unwrap().is_some());
            }
        })
    };

    loop {
        assert!(store.get_active_version().await.unwrap().is_some());
        let active: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM catalog_versions WHERE is_active = 1")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(active, 1);
        if writer.is_finished() {
            break;
        }
    }
    writer.await.unwrap();
}

#[tokio::test]
async fn test_products_round_trip_and_version_isolation() {
    let (_tmp, store) = open().await;
    let v1 = store.create_version("one").await.unwrap().version_id;
    let v2 = store.create_version("two").await.unwrap().version_id;

    let mut caneta = product(1, "Caneta Azul", &v1);
    caneta
        .attributes
        .insert("preco".into(), ScalarValue::Float(2.5));
    let rows = vec![caneta.clone(), product(2, "Lapis", &v1), product(3, "Borracha", &v1)];
    assert_eq!(store.insert_products(&v1, &rows).await.unwrap(), 3);
    store
        .insert_products(&v2, &[product(1, "Caneta Preta", &v2)])
        .await
        .unwrap();

    let got = store.get_products(&v1, &[3, 1, 99]).await.unwrap();
    assert_eq!(got.len(), 2);
    let got_caneta = got.iter().find(|p| p.product_id == 1).unwrap();
    assert_eq!(got_caneta, &caneta);

    assert_eq!(store.count_products(&v1).await.unwrap(), 3);
    let v2_rows = store.list_products(&v2).await.unwrap();
    assert_eq!(v2_rows.len(), 1);
    assert_eq!(v2_rows[0].name_canonical, "caneta preta");
}

#[tokio::test]
async fn test_populated_version_rejects_second_insert() {
    let (_tmp, store) = open().await;
    let v = store.create_version("one").await.unwrap().version_id;
    store.insert_products(&v, &[product(1, "A", &v)]).await.unwrap();

    assert!(store.insert_products(&v, &[product(2, "B", &v)]).await.is_err());
    assert!(store
        .insert_products("unknown", &[product(1, "A", "unknown")])
        .await
        .is_err());
    assert!(store
        .insert_products(&v, &[product(1, "A", "other")])
        .await
        .is_err());
    assert_eq!(store.count_products(&v).await.unwrap(), 1);
}

#[tokio::test]
async fn test_delete_and_prune_spare_the_active_version() {
    let (_tmp, store) = open().await;
    let mut ids = Vec::new();
    for i in 0..4 {
        let v = store.create_version(&format!("v{}", i)).await.unwrap().version_id;
        store
            .insert_products(&v, &[product(1, "A", &v)])
            .await
            .unwrap();
        ids.push(v);
    }
    store.activate_version(&ids[0]).await.unwrap();
    assert!(!store.delete_version(&ids[0]).await.unwrap());

    let removed = prune_versions(&store, 1).await.unwrap();
    assert_eq!(removed, vec![ids[2].clone(), ids[1].clone()]);

    let left: Vec<String> = store
        .list_versions()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.version.version_id)
        .collect();
    assert_eq!(left, vec![ids[3].clone(), ids[0].clone()]);
    assert_eq!(store.count_products(&ids[1]).await.unwrap(), 0);
}

#[tokio::test]
async fn test_vectors_round_trip_per_model() {
    let (_tmp, store) = open().await;
    let v = store.create_version("one").await.unwrap().version_id;
    let vectors = vec![
        StoredVector {
            product_id: 2,
            content_hash: "h2".into(),
            embedding: vec![0.0, 1.0, -0.5],
        },
        StoredVector {
            product_id: 1,
            content_hash: "h1".into(),
            embedding: vec![0.25, 0.5, 0.75],
        },
    ];
    store.save_vectors(&v, "fnv1a-hash", &vectors).await.unwrap();
    // saving again replaces rather than duplicates
    store.save_vectors(&v, "fnv1a-hash", &vectors).await.unwrap();

    let loaded = store.load_vectors(&v, "fnv1a-hash").await.unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0], vectors[1]);
    assert_eq!(loaded[1], vectors[0]);
    assert!(store.load_vectors(&v, "other-model").await.unwrap().is_empty());

    store.delete_vectors(&v).await.unwrap();
    assert!(store.load_vectors(&v, "fnv1a-hash").await.unwrap().is_empty());
}
