//! Rebuild and search through the fully wired catalog (SQLite, Parquet,
//! both indexes, fusion).

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use parquet::arrow::ArrowWriter;
use tempfile::TempDir;

use catalog_search::catalog::Catalog;
use catalog_search::config::Config;
use catalog_search::error::BuildError;
use catalog_search::service::SearchOutcome;
use catalog_search_core::fusion::FusionWeights;
use catalog_search_core::retriever::Retriever;
use catalog_search_core::store::{ProductRepository, VersionStore};

struct Row<'a> {
    id: i64,
    name: &'a str,
    brand: &'a str,
    category: &'a str,
    updated: &'a str,
}

fn write_snapshot(path: &Path, rows: &[Row]) {
    let schema = Arc::new(Schema::new(vec![
        Field::new("codprod", DataType::Int64, false),
        Field::new("descricao", DataType::Utf8, true),
        Field::new("marca", DataType::Utf8, true),
        Field::new("categoria", DataType::Utf8, true),
        Field::new("dt_atualizacao", DataType::Utf8, true),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from(rows.iter().map(|r| r.id).collect::<Vec<_>>())),
            Arc::new(StringArray::from(
                rows.iter().map(|r| r.name).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                rows.iter().map(|r| r.brand).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                rows.iter().map(|r| r.category).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                rows.iter().map(|r| r.updated).collect::<Vec<_>>(),
            )),
        ],
    )
    .unwrap();

    let file = File::create(path).unwrap();
    let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
}

fn stationery() -> Vec<Row<'static>> {
    vec![
        Row {
            id: 1,
            name: "Caneta Esferográfica Azul",
            brand: "Bic",
            category: "Canetas",
            updated: "2024-01-10",
        },
        Row {
            id: 2,
            name: "Caneta Gel Azul",
            brand: "Pentel",
            category: "Canetas",
            updated: "2024-01-10",
        },
        Row {
            id: 3,
            name: "Lápis Grafite HB",
            brand: "Faber-Castell",
            category: "Lápis",
            updated: "2024-01-10",
        },
        Row {
            id: 4,
            name: "Caderno Universitário 10 Matérias",
            brand: "Tilibra",
            category: "Cadernos",
            updated: "2024-01-10",
        },
    ]
}

fn setup() -> (TempDir, PathBuf, Config) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let snapshot = root.join("produtos.parquet");
    write_snapshot(&snapshot, &stationery());

    let config: Config = toml::from_str(&format!(
        r#"
        [db]
        path = "{}/data/catalog.sqlite"

        [source]
        path = "{}"

        [embedding]
        provider = "hash"
        dims = 128
        "#,
        root.display(),
        snapshot.display()
    ))
    .unwrap();
    (tmp, snapshot, config)
}

#[tokio::test]
async fn test_search_without_catalog_is_empty() {
    let (_tmp, _snapshot, config) = setup();
    let catalog = Catalog::open(&config).await.unwrap();

    let outcome = catalog.service.search_deep("caneta", 5, None).await;
    assert!(matches!(outcome, SearchOutcome::NoActiveCatalog));
    assert!(catalog.service.search("caneta", 5, None).await.is_empty());
    catalog.close().await;
}

#[tokio::test]
async fn test_rebuild_then_brand_query_ranks_brand_first() {
    let (_tmp, _snapshot, config) = setup();
    let catalog = Catalog::open(&config).await.unwrap();

    let version = catalog.builder.rebuild("initial").await.unwrap();
    assert_eq!(
        catalog.store.get_active_version().await.unwrap(),
        Some(version.clone())
    );
    assert_eq!(catalog.store.count_products(&version).await.unwrap(), 4);

    let outcome = catalog.service.search_deep("bic azul", 10, None).await;
    let products = outcome.products();
    assert!(!products.is_empty());
    assert_eq!(products[0].product.product_id, 1);
    assert!(products[0].scores.rule_boost > 0.0);
    assert!(products[0].rationale.contains("brand 'bic' in query"));
    assert!(products.iter().all(|p| p.product.catalog_version == version));

    // Accent-insensitive
    let hits = catalog.service.search("LAPIS", 3, None).await;
    assert_eq!(hits[0].product_id, 3);
    assert_eq!(hits[0].canonical_name, "lapis grafite hb");

    // Scores are sorted and top_k is honored
    let hits = catalog.service.search("caneta azul", 2, None).await;
    assert_eq!(hits.len(), 2);
    assert!(hits[0].final_score >= hits[1].final_score);

    catalog.close().await;
}

#[tokio::test]
async fn test_vector_only_weights_still_return_results() {
    let (_tmp, _snapshot, config) = setup();
    let catalog = Catalog::open(&config).await.unwrap();
    catalog.builder.rebuild("initial").await.unwrap();

    let hits = catalog
        .service
        .search("caderno", 3, Some(FusionWeights::new(0.0, 1.0)))
        .await;
    assert!(!hits.is_empty());
    assert_eq!(hits[0].product_id, 4);
    catalog.close().await;
}

#[tokio::test]
async fn test_rollback_serves_previous_version() {
    let (_tmp, snapshot, config) = setup();
    let catalog = Catalog::open(&config).await.unwrap();

    let first = catalog.builder.rebuild("first").await.unwrap();

    let mut rows = stationery();
    rows[2].name = "Lapiseira Técnica";
    write_snapshot(&snapshot, &rows);
    let second = catalog.builder.rebuild("second").await.unwrap();
    assert_ne!(first, second);

    let hits = catalog.service.search("lapiseira", 1, None).await;
    assert_eq!(hits[0].canonical_name, "lapiseira tecnica");

    let restored = catalog.store.rollback_to_previous().await.unwrap();
    assert_eq!(restored, Some(first.clone()));

    let outcome = catalog.service.search_deep("lapis", 1, None).await;
    match outcome {
        SearchOutcome::Ranked {
            version_id,
            products,
        } => {
            assert_eq!(version_id, first);
            assert_eq!(products[0].product.name_canonical, "lapis grafite hb");
        }
        SearchOutcome::NoActiveCatalog => panic!("expected the first version to serve"),
    }
    catalog.close().await;
}

#[tokio::test]
async fn test_released_indexes_load_back_on_rollback_and_prune_drops_them() {
    let (_tmp, snapshot, config) = setup();
    let catalog = Catalog::open(&config).await.unwrap();

    let first = catalog.builder.rebuild("first").await.unwrap();
    let mut rows = stationery();
    rows[3].name = "Agenda Executiva";
    write_snapshot(&snapshot, &rows);
    let second = catalog.builder.rebuild("second").await.unwrap();
    rows[3].name = "Estojo Escolar";
    write_snapshot(&snapshot, &rows);
    let third = catalog.builder.rebuild("third").await.unwrap();

    // Only the active version and the one before it stay in memory.
    assert!(!catalog.lexical.has_index(&first));
    assert!(!catalog.vector.has_index(&first));
    assert!(catalog.vector.has_index(&second));
    assert!(catalog.vector.has_index(&third));

    assert_eq!(catalog.store.rollback_to_previous().await.unwrap(), Some(second.clone()));
    assert_eq!(catalog.store.rollback_to_previous().await.unwrap(), Some(first.clone()));
    let hits = catalog.service.search("caderno", 1, None).await;
    assert_eq!(hits[0].product_id, 4);
    assert!(catalog.lexical.has_index(&first));
    assert!(catalog.vector.has_index(&first));

    let removed = catalog.prune(0).await.unwrap();
    assert_eq!(removed, vec![third.clone(), second.clone()]);
    assert!(!catalog.vector.has_index(&second));
    assert!(!catalog.lexical.has_index(&third));
    catalog.close().await;
}

#[tokio::test]
async fn test_failed_rebuild_keeps_previous_active() {
    let (_tmp, snapshot, config) = setup();
    let catalog = Catalog::open(&config).await.unwrap();
    let first = catalog.builder.rebuild("first").await.unwrap();

    write_snapshot(&snapshot, &[]);
    let err = catalog.builder.rebuild("empty").await.unwrap_err();
    assert!(matches!(err, BuildError::EmptySource));

    std::fs::remove_file(&snapshot).unwrap();
    let err = catalog.builder.rebuild("missing").await.unwrap_err();
    assert!(matches!(err, BuildError::Source(_)));

    assert_eq!(catalog.store.get_active_version().await.unwrap(), Some(first));
    assert_eq!(catalog.store.list_versions().await.unwrap().len(), 1);
    catalog.close().await;
}

#[tokio::test]
async fn test_reopened_catalog_serves_from_persisted_state() {
    let (_tmp, _snapshot, config) = setup();
    let version = {
        let catalog = Catalog::open(&config).await.unwrap();
        let v = catalog.builder.rebuild("initial").await.unwrap();
        catalog.close().await;
        v
    };

    let catalog = Catalog::open(&config).await.unwrap();
    assert!(!catalog.vector.has_index(&version));
    assert_eq!(catalog.service.warm().await.unwrap(), Some(version.clone()));
    assert_eq!(catalog.lexical.doc_count(&version), 4);
    assert_eq!(catalog.vector.vector_count(&version), 4);

    let hits = catalog.service.search("tilibra", 1, None).await;
    assert_eq!(hits[0].product_id, 4);
    catalog.close().await;
}
