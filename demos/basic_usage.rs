// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic search-bridge usage example.
//!
//! Demonstrates:
//! 1. Loading backends from TOML into the process-wide registry
//! 2. Declaring an indexed model
//! 3. Rebuilding the index from a store
//! 4. Searching, filtering, slicing and faceting
//! 5. Clean shutdown
//!
//! Uses the embedded SQLite backend, so nothing external is needed.
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=search_bridge=debug cargo run --example basic_usage
//! ```

use std::sync::Arc;

use search_bridge::index::{AttributeKind, AttributeValue, IndexField, Indexable, ModelRegistry, ModelSpec};
use search_bridge::query::{Predicate, QuerySet, SearchQuery};
use search_bridge::storage::InMemoryStore;
use search_bridge::{registry, SearchConfig, SearchOptions};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct Book {
    id: u32,
    title: &'static str,
    genre: &'static str,
}

impl Indexable for Book {
    fn model(&self) -> &str {
        "library.Book"
    }

    fn pk(&self) -> String {
        self.id.to_string()
    }

    fn attribute(&self, name: &str) -> Option<AttributeValue<'_>> {
        match name {
            "title" => Some(AttributeValue::from_value(self.title)),
            "genre" => Some(AttributeValue::from_value(self.genre)),
            _ => None,
        }
    }
}

const CONFIG: &str = r#"
[backends.default]
kind = "embedded"
url = "sqlite::memory:"
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Models and backends
    // ─────────────────────────────────────────────────────────────────────────
    let mut models = ModelRegistry::new();
    models.register(
        ModelSpec::new("library", "Book")
            .attribute("title", AttributeKind::Char)
            .attribute("genre", AttributeKind::Char)
            .search_fields([
                IndexField::search("title").boost(2.0),
                IndexField::autocomplete("title"),
                IndexField::filter("genre"),
            ]),
    )?;
    let models = Arc::new(models);

    registry::init(&SearchConfig::from_toml_str(CONFIG)?, models.clone()).await?;
    let backend = registry::get_search_backend(None)?;
    println!("Backend '{}' ({})", backend.alias(), backend.adapter().kind());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Load the store and rebuild the index
    // ─────────────────────────────────────────────────────────────────────────
    let books = vec![
        Book { id: 1, title: "JavaScript: The Good Parts", genre: "web" },
        Book { id: 2, title: "Learning Python", genre: "general" },
        Book { id: 3, title: "The Rust Programming Language", genre: "systems" },
        Book { id: 4, title: "Programming Rust", genre: "systems" },
    ];
    let store = Arc::new(InMemoryStore::with_registry(models));
    for book in &books {
        store.insert(book.clone());
    }
    backend.rebuild_index("library.Book", &books).await?;

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Query
    // ─────────────────────────────────────────────────────────────────────────
    let all = || -> QuerySet<Book> { QuerySet::new("library.Book", store.clone()) };

    let mut results = backend.search("rust", all(), SearchOptions::new()).await?;
    println!("\n\"rust\": {} hits", results.count().await?);
    for book in results.results().await? {
        println!("   #{} {}", book.id, book.title);
    }

    let systems = all().filter(Predicate::exact("genre", "systems"));
    let first = backend
        .search(SearchQuery::MatchAll, systems, SearchOptions::new())
        .await?
        .slice(..1)
        .into_vec()
        .await?;
    println!("\nFirst systems book: {:?}", first.first().map(|b| b.title));

    let facets = backend
        .search(SearchQuery::MatchAll, all(), SearchOptions::new())
        .await?
        .facet("genre")
        .await?;
    println!("\nGenres: {facets:?}");

    let suggestions = backend
        .autocomplete("prog", all(), SearchOptions::new())
        .await?
        .into_vec()
        .await?;
    println!("\nAutocomplete \"prog\": {} suggestions", suggestions.len());

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Shutdown
    // ─────────────────────────────────────────────────────────────────────────
    registry::shutdown();
    println!("\nDone.");
    Ok(())
}
