//! # Search Bridge
//!
//! A pluggable full-text search layer: one query language, compiled for
//! whichever search engine a backend is configured with.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     SearchBackend (facade)                  │
//! │  • search() / autocomplete() → lazy ResultSet               │
//! │  • add() / add_bulk() / delete() / rebuild_index()          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Query compilation                       │
//! │  • SearchQuery AST + queryset Predicate / OrderBy           │
//! │  • ModelRegistry field descriptors, check() before any I/O  │
//! │  • FilterDialect renders filters per engine                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              ┌───────────────┴───────────────┐
//!              ▼                               ▼
//! ┌───────────────────────────┐   ┌───────────────────────────┐
//! │  Cluster (JSON query DSL) │   │  Embedded (SQLite FTS5)   │
//! │  • index per root model   │   │  • one shared index       │
//! │  • atomic alias rebuilds  │   │  • bm25 ranking           │
//! │  • HTTP / in-memory       │   │  • sqlx pool              │
//! └───────────────────────────┘   └───────────────────────────┘
//!                              │
//!                   (primary keys + scores)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ObjectStore (source of truth)               │
//! │  • ResultSet hydrates hits in rank order, drops stale keys  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use search_bridge::backends::{SearchBackend, SearchOptions};
//! use search_bridge::backends::cluster::{ClusterBackend, InMemoryCluster};
//! use search_bridge::index::{AttributeKind, AttributeValue, IndexField, Indexable, ModelRegistry, ModelSpec};
//! use search_bridge::query::QuerySet;
//! use search_bridge::storage::InMemoryStore;
//!
//! #[derive(Clone)]
//! struct Book { id: u32, title: String }
//!
//! impl Indexable for Book {
//!     fn model(&self) -> &str { "library.Book" }
//!     fn pk(&self) -> String { self.id.to_string() }
//!     fn attribute(&self, name: &str) -> Option<AttributeValue<'_>> {
//!         (name == "title").then(|| AttributeValue::from_value(self.title.clone()))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> search_bridge::Result<()> {
//!     let mut registry = ModelRegistry::new();
//!     registry.register(
//!         ModelSpec::new("library", "Book")
//!             .attribute("title", AttributeKind::Char)
//!             .search_field(IndexField::search("title").boost(2.0)),
//!     )?;
//!
//!     let adapter = ClusterBackend::new(Arc::new(InMemoryCluster::new()), Arc::new(registry), "search");
//!     let backend = SearchBackend::new("default", Arc::new(adapter));
//!     backend.reset_index().await?;
//!
//!     let store = Arc::new(InMemoryStore::new());
//!     let book = Book { id: 1, title: "JavaScript: The Good Parts".into() };
//!     store.insert(book.clone());
//!     backend.add(&book).await?;
//!     backend.refresh_index().await?;
//!
//!     let books: QuerySet<Book> = QuerySet::new("library.Book", store);
//!     let mut results = backend.search("javascript", books, SearchOptions::new()).await?;
//!     assert_eq!(results.count().await?, 1);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See [`config::SearchConfig`] for the TOML layout and [`registry`] for
//! process-wide named backends.
//!
//! ## Modules
//!
//! - [`query`]: Search expressions, predicates and querysets
//! - [`index`]: Model registry, field descriptors, mappings and documents
//! - [`backends`]: The [`SearchBackend`] facade and the cluster/embedded engines
//! - [`storage`]: Object-store collaborator used to hydrate results
//! - [`registry`]: Process-wide backends keyed by alias
//! - [`metrics`]: `metrics` crate instrumentation

pub mod backends;
pub mod config;
pub mod error;
pub mod index;
pub mod metrics;
pub mod query;
pub mod registry;
pub mod storage;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use backends::{ResultSet, SearchBackend, SearchOptions};
pub use config::{BackendConfig, BackendKind, SearchConfig};
pub use error::{Result, SearchError};
pub use index::{IndexField, Indexable, ModelRegistry, ModelSpec};
pub use metrics::LatencyTimer;
pub use query::{Operator, Predicate, QuerySet, SearchQuery};
