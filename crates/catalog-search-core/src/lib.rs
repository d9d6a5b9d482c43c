//! # Catalog Search Core
//!
//! Storage-agnostic core of the catalog search engine: product models,
//! text normalization, storage traits with an in-memory backend, the two
//! retrieval indexes and rank fusion.
//!
//! Nothing here touches SQLite, files or the network. The `catalog-search`
//! app crate plugs concrete storage, extraction and model-backed
//! embedding providers into these traits.
//!
//! ```text
//! ProductCanonical ──► LexicalIndex (BM25) ──┐
//!        │                                    ├──► FusionEngine ──► RankedProduct
//!        └──────────► VectorIndex (cosine) ──┘         ▲
//!                                                      │
//!                                           ProductRepository
//! ```
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Raw and canonical product records, versions, scores |
//! | [`normalize`] | Diacritic-insensitive text normalization and tokens |
//! | [`store`] | Version, product and vector storage traits |
//! | [`embedding`] | Embedding provider trait and the hash embedder |
//! | [`retriever`] | Shared capability of both retrieval paths |
//! | [`lexical`] | BM25 inverted index |
//! | [`vector`] | Dense vector index |
//! | [`fusion`] | Reciprocal rank fusion and boost rules |

pub mod embedding;
pub mod fusion;
pub mod lexical;
pub mod models;
pub mod normalize;
pub mod retriever;
pub mod store;
pub mod vector;
