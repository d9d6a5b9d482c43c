//! # Catalog Search
//!
//! Versioned hybrid product search over a columnar catalog snapshot.
//!
//! A rebuild reads the source file, canonicalizes every record, stores the
//! result as a new immutable catalog version in SQLite, builds a BM25 and a
//! vector index for it and only then flips the active pointer. Queries run
//! both retrieval paths concurrently against the active version and fuse
//! them with weighted reciprocal rank fusion plus brand boosts.
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────────────┐
//! │ Parquet  │──▶│  Builder  │──▶│ SQLite versions  │
//! │ snapshot │   │ normalize │   │ products vectors │
//! └──────────┘   └─────┬─────┘   └────────┬─────────┘
//!                      ▼                  │
//!              ┌───────────────┐          │
//!              │ BM25 │ Vector │◀─────────┘
//!              └───────┬───────┘
//!                      ▼
//!              ┌───────────────┐
//!              │ SearchService │  RRF + boosts
//!              └───────────────┘
//! ```
//!
//! Storage traits, indexes, normalization and fusion live in
//! `catalog-search-core`; this crate adds SQLite persistence, Parquet
//! extraction, embedding backends, configuration and the `catalog` CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite pool |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | Version, product and vector persistence |
//! | [`extract`] | Parquet source reader |
//! | [`builder`] | Full and incremental catalog rebuilds |
//! | [`embedding`] | OpenAI and local embedding providers |
//! | [`service`] | `search_deep` orchestration |
//! | [`catalog`] | Component wiring |

pub mod builder;
pub mod catalog;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod migrate;
pub mod rebuild;
pub mod search;
pub mod service;
pub mod sqlite_store;
pub mod stats;
pub mod versions;
