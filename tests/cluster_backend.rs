//! End-to-end tests for the cluster backend.
//!
//! Everything runs against [`InMemoryCluster`], so no external services are
//! needed:
//!
//! ```bash
//! cargo test --test cluster_backend
//! ```

use std::sync::Arc;

use serde_json::{json, Value};

use search_bridge::backends::cluster::{ClusterBackend, InMemoryCluster};
use search_bridge::backends::{SearchBackend, SearchOptions};
use search_bridge::index::{AttributeKind, AttributeValue, IndexField, Indexable, ModelRegistry, ModelSpec};
use search_bridge::query::{Predicate, QuerySet, SearchQuery};
use search_bridge::storage::InMemoryStore;
use search_bridge::SearchError;

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Book {
    model: &'static str,
    id: u32,
    title: &'static str,
    genre: Option<&'static str>,
    publication_date: &'static str,
    pages: i64,
    score: Option<f64>,
}

impl Indexable for Book {
    fn model(&self) -> &str {
        self.model
    }

    fn pk(&self) -> String {
        self.id.to_string()
    }

    fn attribute(&self, name: &str) -> Option<AttributeValue<'_>> {
        let value = match name {
            "title" => json!(self.title),
            "genre" => json!(self.genre),
            "publication_date" => json!(self.publication_date),
            "number_of_pages" => json!(self.pages),
            _ => return None,
        };
        Some(AttributeValue::Value(value))
    }

    fn set_score(&mut self, _attribute: &str, score: Option<f64>) {
        self.score = score;
    }
}

fn book(id: u32, title: &'static str, genre: Option<&'static str>, date: &'static str, pages: i64) -> Book {
    Book {
        model: "searchtests.Book",
        id,
        title,
        genre,
        publication_date: date,
        pages,
        score: None,
    }
}

fn novel(id: u32, title: &'static str) -> Book {
    Book {
        model: "searchtests.Novel",
        ..book(id, title, Some("fiction"), "2001-01-01", 200)
    }
}

fn registry() -> Arc<ModelRegistry> {
    let mut registry = ModelRegistry::new();
    registry
        .register(
            ModelSpec::new("searchtests", "Book")
                .attribute("title", AttributeKind::Char)
                .attribute("genre", AttributeKind::Char)
                .attribute("publication_date", AttributeKind::Date)
                .attribute("number_of_pages", AttributeKind::Integer)
                .search_fields([
                    IndexField::search("title").boost(2.0),
                    IndexField::autocomplete("title"),
                    IndexField::filter("genre"),
                    IndexField::filter("publication_date"),
                    IndexField::filter("number_of_pages"),
                ]),
        )
        .unwrap();
    registry
        .register(ModelSpec::new("searchtests", "Novel").parent("searchtests.Book"))
        .unwrap();
    Arc::new(registry)
}

struct Fixture {
    cluster: Arc<InMemoryCluster>,
    backend: SearchBackend,
    store: Arc<InMemoryStore<Book>>,
}

impl Fixture {
    fn new(atomic_rebuild: bool) -> Self {
        let registry = registry();
        let cluster = Arc::new(InMemoryCluster::new());
        let adapter = ClusterBackend::new(cluster.clone(), registry.clone(), "search").with_atomic_rebuild(atomic_rebuild);
        Self {
            cluster,
            backend: SearchBackend::new("default", Arc::new(adapter)),
            store: Arc::new(InMemoryStore::with_registry(registry)),
        }
    }

    /// Store `books` and rebuild the index from them
    async fn seeded(books: &[Book]) -> Self {
        let fixture = Self::new(false);
        fixture.load(books).await;
        fixture
    }

    async fn load(&self, books: &[Book]) {
        for book in books {
            self.store.insert(book.clone());
        }
        self.backend.rebuild_index("searchtests.Book", books).await.unwrap();
    }

    fn books(&self) -> QuerySet<Book> {
        QuerySet::new("searchtests.Book", self.store.clone())
    }

    fn novels(&self) -> QuerySet<Book> {
        QuerySet::new("searchtests.Novel", self.store.clone())
    }

    async fn titles(&self, query: impl Into<search_bridge::query::QueryInput>, queryset: QuerySet<Book>) -> Vec<&'static str> {
        self.backend
            .search(query, queryset, SearchOptions::new())
            .await
            .unwrap()
            .into_vec()
            .await
            .unwrap()
            .iter()
            .map(|b| b.title)
            .collect()
    }
}

fn library() -> Vec<Book> {
    vec![
        book(1, "JavaScript: The Good Parts", Some("A"), "2008-05-01", 176),
        book(2, "Learning Python", Some("A"), "2013-06-01", 1648),
        book(3, "The Rust Programming Language", Some("A"), "2019-08-12", 560),
        book(4, "Programming Rust", Some("B"), "2020-06-01", 738),
        book(5, "Rust in Action", Some("B"), "2021-01-01", 456),
    ]
}

// =============================================================================
// Search
// =============================================================================

#[tokio::test]
async fn test_search_finds_single_match() {
    let fixture = Fixture::seeded(&library()).await;
    let mut results = fixture
        .backend
        .search("JavaScript", fixture.books(), SearchOptions::new())
        .await
        .unwrap();

    assert_eq!(results.count().await.unwrap(), 1);
    let found = results.results().await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, 1);
}

#[tokio::test]
async fn test_boosted_title_ranks_multi_term_matches_first() {
    let fixture = Fixture::seeded(&library()).await;
    let titles = fixture.titles("rust programming", fixture.books()).await;
    assert_eq!(titles[..2], ["The Rust Programming Language", "Programming Rust"]);
    assert_eq!(titles.len(), 3);
}

#[tokio::test]
async fn test_year_filter_is_half_open() {
    let fixture = Fixture::seeded(&library()).await;
    let books = fixture
        .books()
        .filter(Predicate::year("publication_date", "exact", 2020));
    assert_eq!(fixture.titles(SearchQuery::MatchAll, books).await, vec!["Programming Rust"]);

    let books = fixture
        .books()
        .filter(Predicate::year("publication_date", "gte", 2020));
    let mut titles = fixture.titles(SearchQuery::MatchAll, books).await;
    titles.sort_unstable();
    assert_eq!(titles, vec!["Programming Rust", "Rust in Action"]);
}

#[tokio::test]
async fn test_filter_and_explicit_order() {
    let fixture = Fixture::seeded(&library()).await;
    let books = fixture
        .books()
        .filter(Predicate::exact("genre", "A"))
        .order_by(["-number_of_pages"]);
    let results = fixture
        .backend
        .search(SearchQuery::MatchAll, books, SearchOptions::new().order_by_relevance(false))
        .await
        .unwrap()
        .into_vec()
        .await
        .unwrap();
    let ids: Vec<u32> = results.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![2, 3, 1]);
}

#[tokio::test]
async fn test_unfilterable_field_is_rejected_before_any_request() {
    let fixture = Fixture::seeded(&library()).await;
    fixture.cluster.clear_requests();

    let books = fixture.books().filter(Predicate::exact("title", "Rust in Action"));
    let err = fixture
        .backend
        .search("rust", books, SearchOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::FilterField { .. }));
    assert_eq!(err.field_name(), Some("title"));
    assert!(fixture.cluster.requests().is_empty());
}

#[tokio::test]
async fn test_fields_must_be_searchable() {
    let fixture = Fixture::seeded(&library()).await;
    let err = fixture
        .backend
        .search("rust", fixture.books(), SearchOptions::new().fields(["author"]))
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::SearchField { .. }));
    assert_eq!(err.field_name(), Some("author"));
    assert!(err.to_string().contains("SearchField(\"author\")"));

    let mut results = fixture
        .backend
        .search("rust", fixture.books(), SearchOptions::new().fields(["title"]))
        .await
        .unwrap();
    assert_eq!(results.count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_null_query_matches_everything() {
    let fixture = Fixture::seeded(&library()).await;
    let mut results = fixture
        .backend
        .search(None::<SearchQuery>, fixture.books(), SearchOptions::new())
        .await
        .unwrap();
    assert_eq!(results.count().await.unwrap(), 5);
}

#[tokio::test]
async fn test_negation_and_phrase() {
    let fixture = Fixture::seeded(&library()).await;
    let query = SearchQuery::plain_text("rust").and(SearchQuery::plain_text("action").negate());
    let mut titles = fixture.titles(query, fixture.books()).await;
    titles.sort_unstable();
    assert_eq!(titles, vec!["Programming Rust", "The Rust Programming Language"]);

    let titles = fixture.titles(SearchQuery::phrase("programming rust"), fixture.books()).await;
    assert_eq!(titles, vec!["Programming Rust"]);
}

#[tokio::test]
async fn test_subtype_search_is_scoped_by_content_type() {
    let mut books = library();
    books.push(novel(6, "A Rust Mystery"));
    let fixture = Fixture::seeded(&books).await;

    assert_eq!(fixture.titles("rust", fixture.novels()).await, vec!["A Rust Mystery"]);
    assert_eq!(fixture.titles("rust", fixture.books()).await.len(), 4);
}

// =============================================================================
// Result sets
// =============================================================================

#[tokio::test]
async fn test_slices_compose_and_count_is_stable() {
    let fixture = Fixture::seeded(&library()).await;
    let books = fixture.books();
    let results = fixture
        .backend
        .search(SearchQuery::MatchAll, books, SearchOptions::new().order_by_relevance(false))
        .await
        .unwrap();

    let mut window = results.slice(1..).slice(..2);
    let before = window.count().await.unwrap();
    let ids: Vec<u32> = window.results().await.unwrap().iter().map(|b| b.id).collect();
    assert_eq!(before, 2);
    assert_eq!(window.count().await.unwrap(), before);
    // default order is descending primary key
    assert_eq!(ids, vec![4, 3]);
}

#[tokio::test]
async fn test_stale_hits_are_dropped() {
    let fixture = Fixture::seeded(&library()).await;
    fixture.store.remove("searchtests.Book", "1");
    let mut results = fixture
        .backend
        .search(SearchQuery::MatchAll, fixture.books(), SearchOptions::new())
        .await
        .unwrap();
    assert_eq!(results.len().await.unwrap(), 4);
}

#[tokio::test]
async fn test_annotate_score() {
    let fixture = Fixture::seeded(&library()).await;
    let results = fixture
        .backend
        .search("javascript", fixture.books(), SearchOptions::new())
        .await
        .unwrap()
        .annotate_score("_score")
        .into_vec()
        .await
        .unwrap();
    assert!(results[0].score.is_some_and(|score| score > 0.0));
}

#[tokio::test]
async fn test_facet_reports_missing_bucket() {
    let fixture = Fixture::seeded(&library()).await;
    let results = fixture
        .backend
        .search(SearchQuery::MatchAll, fixture.books(), SearchOptions::new())
        .await
        .unwrap();

    let facets = results.facet("genre").await.unwrap();
    assert_eq!(
        facets,
        vec![(Some(json!("A")), 3), (Some(json!("B")), 2), (None::<Value>, 0)]
    );

    let err = results.facet("title").await.unwrap_err();
    assert!(matches!(err, SearchError::FacetField { .. }));
}

// =============================================================================
// Autocomplete
// =============================================================================

#[tokio::test]
async fn test_autocomplete_prefixes() {
    let fixture = Fixture::seeded(&library()).await;
    let found = fixture
        .backend
        .autocomplete("jav", fixture.books(), SearchOptions::new())
        .await
        .unwrap()
        .into_vec()
        .await
        .unwrap();
    assert_eq!(found.iter().map(|b| b.id).collect::<Vec<_>>(), vec![1]);

    let err = fixture
        .backend
        .autocomplete(SearchQuery::phrase("java script"), fixture.books(), SearchOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::NotSupported(_)));
}

// =============================================================================
// Indexing
// =============================================================================

#[tokio::test]
async fn test_add_and_delete_are_idempotent() {
    let fixture = Fixture::seeded(&library()).await;
    let extra = book(7, "Zero To Production", Some("B"), "2022-01-01", 500);
    fixture.store.insert(extra.clone());
    fixture.backend.add(&extra).await.unwrap();
    fixture.backend.refresh_index().await.unwrap();
    assert_eq!(fixture.titles("production", fixture.books()).await, vec!["Zero To Production"]);

    fixture.backend.delete(&extra).await.unwrap();
    fixture.backend.delete(&extra).await.unwrap();
    assert!(fixture.titles("production", fixture.books()).await.is_empty());

    let index = fixture.backend.index_for_model("searchtests.Book").unwrap();
    index.delete().await.unwrap();
    index.delete().await.unwrap();
    assert!(fixture.cluster.indices().is_empty());
}

#[tokio::test]
async fn test_atomic_rebuild_has_no_gap() {
    let fixture = Fixture::new(true);
    let first = library();
    fixture.load(&first).await;
    assert_eq!(fixture.cluster.alias_targets("search__searchtests_book").len(), 1);
    let old_generation = fixture.cluster.alias_targets("search__searchtests_book");

    let mut rebuilder = fixture.backend.rebuilder("searchtests.Book").unwrap();
    let new_index = rebuilder.start().await.unwrap();
    new_index.add_model("searchtests.Book").await.unwrap();
    new_index.add_item(&first[0]).await.unwrap();

    // Readers still see the complete previous generation
    let mut during = fixture
        .backend
        .search(SearchQuery::MatchAll, fixture.books(), SearchOptions::new())
        .await
        .unwrap();
    assert_eq!(during.count().await.unwrap(), 5);

    let rest: Vec<&dyn Indexable> = first[1..].iter().map(|b| b as &dyn Indexable).collect();
    new_index.add_items("searchtests.Book", &rest).await.unwrap();
    rebuilder.finish().await.unwrap();

    let targets = fixture.cluster.alias_targets("search__searchtests_book");
    assert_eq!(targets, vec![new_index.name().to_string()]);
    assert!(!fixture.cluster.indices().contains(&old_generation[0]));

    let mut after = fixture
        .backend
        .search(SearchQuery::MatchAll, fixture.books(), SearchOptions::new())
        .await
        .unwrap();
    assert_eq!(after.count().await.unwrap(), 5);
}
