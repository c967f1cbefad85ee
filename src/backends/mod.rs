// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Search backends.
//!
//! [`SearchBackend`] is the entry point callers hold. It owns one
//! [`BackendAdapter`] (the engine-specific strategy) and routes every call
//! through it:
//!
//! ```text
//! search(query, queryset)
//!       │
//!       ├─→ unindexed model / blank text? ──→ ResultSet::empty()
//!       │
//!       ├─→ QueryInput ──→ SearchQuery (Null warns, becomes MatchAll)
//!       │
//!       ├─→ adapter.compile(CompileRequest)      check() runs here, no I/O
//!       │        │
//!       │        └─→ Arc<dyn SearchExecutor>
//!       │
//!       └─→ ResultSet::new(executor, queryset)    lazy, runs on first access
//! ```

pub mod cluster;
pub mod compiler;
pub mod embedded;
pub mod index;
pub mod results;

use std::error::Error as StdError;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

pub use self::compiler::{CompileRequest, CompilerMode, FilterDialect, QueryCompiler};
pub use self::index::{IndexRebuilder, ResetRebuilder, SearchIndex};
pub use self::results::{FacetCounts, Hit, ResultSet, SearchExecutor, Window};

use crate::config::{BackendConfig, BackendKind};
use crate::error::{Result, SearchError};
use crate::index::{Indexable, ModelRegistry};
use crate::metrics;
use crate::query::{Operator, QueryInput, QuerySet, SearchQuery};

/// Objects sent per bulk call while rebuilding
pub const REBUILD_CHUNK_SIZE: usize = 1000;

/// Engine-specific half of a backend
pub trait BackendAdapter: Send + Sync {
    /// Short engine name used in logs and metrics
    fn kind(&self) -> &'static str;

    fn registry(&self) -> &Arc<ModelRegistry>;

    /// Operator for text queries that don't name one
    fn default_operator(&self) -> Operator;

    fn supports_autocomplete(&self) -> bool {
        true
    }

    /// Validate and compile one search call. Must not perform I/O.
    fn compile(&self, request: &CompileRequest) -> Result<Arc<dyn SearchExecutor>>;

    fn index_for_model(&self, model: &str) -> Result<Arc<dyn SearchIndex>>;

    /// Every distinct index the backend manages
    fn all_indexes(&self) -> Vec<Arc<dyn SearchIndex>>;

    fn rebuilder(&self, model: &str) -> Result<Box<dyn IndexRebuilder>>;
}

/// Per-call search options
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    /// Restrict matching to these searchable fields
    pub fields: Option<Vec<String>>,
    /// Operator for text input (default: the backend's)
    pub operator: Option<Operator>,
    pub order_by_relevance: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            fields: None,
            operator: None,
            order_by_relevance: true,
        }
    }
}

impl SearchOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn operator(mut self, operator: Operator) -> Self {
        self.operator = Some(operator);
        self
    }

    #[must_use]
    pub fn order_by_relevance(mut self, order_by_relevance: bool) -> Self {
        self.order_by_relevance = order_by_relevance;
        self
    }
}

/// A named, configured search backend
#[derive(Clone)]
pub struct SearchBackend {
    alias: String,
    adapter: Arc<dyn BackendAdapter>,
}

impl std::fmt::Debug for SearchBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchBackend")
            .field("alias", &self.alias)
            .field("kind", &self.adapter.kind())
            .finish()
    }
}

impl SearchBackend {
    pub fn new(alias: impl Into<String>, adapter: Arc<dyn BackendAdapter>) -> Self {
        Self {
            alias: alias.into(),
            adapter,
        }
    }

    /// Build the backend `config` describes
    pub async fn from_config(alias: &str, config: &BackendConfig, registry: Arc<ModelRegistry>) -> Result<Self> {
        let adapter: Arc<dyn BackendAdapter> = match config.kind {
            BackendKind::Cluster => Arc::new(cluster::ClusterBackend::from_config(config, registry)?),
            BackendKind::Embedded => Arc::new(embedded::EmbeddedBackend::from_config(config, registry).await?),
        };
        info!(alias, kind = adapter.kind(), index = config.index_name(), "Search backend configured");
        Ok(Self::new(alias, adapter))
    }

    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    #[must_use]
    pub fn adapter(&self) -> &Arc<dyn BackendAdapter> {
        &self.adapter
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Search API
    // ═══════════════════════════════════════════════════════════════════════════

    /// Full-text search over the objects of `queryset`.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use search_bridge::backends::{SearchBackend, SearchOptions};
    /// # use search_bridge::query::QuerySet;
    /// # use search_bridge::index::Indexable;
    /// # async fn example<T: Indexable + Clone>(backend: &SearchBackend, books: QuerySet<T>) -> search_bridge::Result<()> {
    /// let mut results = backend
    ///     .search("javascript", books, SearchOptions::new().fields(["title"]))
    ///     .await?;
    /// let first_page = results.slice(..10).into_vec().await?;
    /// let total = results.count().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn search<T: Indexable + Clone>(
        &self,
        query: impl Into<QueryInput>,
        queryset: QuerySet<T>,
        options: SearchOptions,
    ) -> Result<ResultSet<T>> {
        self.search_with_mode(query.into(), queryset, options, CompilerMode::Search)
            .await
    }

    /// Prefix search over the autocomplete fields of `queryset`'s model.
    pub async fn autocomplete<T: Indexable + Clone>(
        &self,
        query: impl Into<QueryInput>,
        queryset: QuerySet<T>,
        options: SearchOptions,
    ) -> Result<ResultSet<T>> {
        if !self.adapter.supports_autocomplete() {
            return Err(SearchError::NotSupported(
                "This search backend does not support the autocomplete API".to_string(),
            ));
        }
        self.search_with_mode(query.into(), queryset, options, CompilerMode::Autocomplete)
            .await
    }

    async fn search_with_mode<T: Indexable + Clone>(
        &self,
        query: QueryInput,
        queryset: QuerySet<T>,
        options: SearchOptions,
        mode: CompilerMode,
    ) -> Result<ResultSet<T>> {
        let backend = self.adapter.kind();
        let kind = match mode {
            CompilerMode::Search => "search",
            CompilerMode::Autocomplete => "autocomplete",
        };

        if !self.adapter.registry().is_indexed(queryset.model()) {
            metrics::record_search_query(backend, kind, "empty");
            return Ok(ResultSet::empty());
        }

        let query = match query {
            QueryInput::Text(text) if text.trim().is_empty() => {
                metrics::record_search_query(backend, kind, "empty");
                return Ok(ResultSet::empty());
            }
            QueryInput::Text(text) => SearchQuery::PlainText {
                text,
                operator: options.operator.unwrap_or_else(|| self.adapter.default_operator()),
            },
            QueryInput::Query(query) => query,
            QueryInput::Null => {
                warn!("Querying `None` is deprecated, use `MatchAll` instead.");
                SearchQuery::MatchAll
            }
        };

        let request = CompileRequest {
            model: queryset.model().to_string(),
            predicate: queryset.predicate().cloned(),
            ordering: queryset.ordering().to_vec(),
            query,
            fields: options.fields.filter(|fields| !fields.is_empty()),
            order_by_relevance: options.order_by_relevance,
            mode,
        };

        match self.adapter.compile(&request) {
            Ok(executor) => {
                debug!(alias = %self.alias, model = %request.model, query = request.query.kind(), kind, "Search compiled");
                metrics::record_search_query(backend, kind, "success");
                Ok(ResultSet::new(executor, queryset))
            }
            Err(e) => {
                metrics::record_search_query(backend, kind, "error");
                Err(e)
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Index API
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn index_for_model(&self, model: &str) -> Result<Arc<dyn SearchIndex>> {
        self.adapter.index_for_model(model)
    }

    #[must_use]
    pub fn all_indexes(&self) -> Vec<Arc<dyn SearchIndex>> {
        self.adapter.all_indexes()
    }

    /// Refresh every index this backend manages
    pub async fn refresh_index(&self) -> Result<()> {
        for index in self.all_indexes() {
            index.refresh().await?;
        }
        Ok(())
    }

    /// Delete and recreate every index this backend manages
    pub async fn reset_index(&self) -> Result<()> {
        for index in self.all_indexes() {
            index.reset().await?;
            info!(alias = %self.alias, index = index.name(), "Index reset");
        }
        Ok(())
    }

    /// Index or re-index one object
    pub async fn add(&self, obj: &dyn Indexable) -> Result<()> {
        if !self.adapter.registry().is_indexed(obj.model()) {
            return Ok(());
        }
        self.index_for_model(obj.model())?.add_item(obj).await
    }

    /// Index many objects of `model` in one bulk call
    pub async fn add_bulk<T: Indexable>(&self, model: &str, objects: &[T]) -> Result<()> {
        if !self.adapter.registry().is_indexed(model) || objects.is_empty() {
            return Ok(());
        }
        let items: Vec<&dyn Indexable> = objects.iter().map(|obj| obj as &dyn Indexable).collect();
        self.index_for_model(model)?.add_items(model, &items).await
    }

    /// Remove one object. Missing documents are not an error.
    pub async fn delete(&self, obj: &dyn Indexable) -> Result<()> {
        if !self.adapter.registry().is_indexed(obj.model()) {
            return Ok(());
        }
        self.index_for_model(obj.model())?.delete_item(obj).await
    }

    pub fn rebuilder(&self, model: &str) -> Result<Box<dyn IndexRebuilder>> {
        self.adapter.rebuilder(model)
    }

    /// Repopulate the index of `model` from `objects`.
    ///
    /// Every indexed model sharing the index gets its mapping put before the
    /// objects are sent in chunks of [`REBUILD_CHUNK_SIZE`].
    pub async fn rebuild_index<T: Indexable>(&self, model: &str, objects: &[T]) -> Result<()> {
        let registry = self.adapter.registry().clone();
        let root = registry
            .root_of(model)
            .map(|root| root.label())
            .ok_or_else(|| SearchError::Configuration(format!("model {model} is not registered")))?;

        let mut rebuilder = self.rebuilder(model)?;
        let index = rebuilder.start().await?;
        info!(alias = %self.alias, index = index.name(), model, count = objects.len(), "Rebuild started");

        for spec in registry.indexed_models() {
            let label = spec.label();
            if registry.root_of(&label).map(|r| r.label()).as_deref() == Some(root.as_str()) {
                index.add_model(&label).await?;
            }
        }

        for chunk in objects.chunks(REBUILD_CHUNK_SIZE) {
            // Group by concrete model, keeping first-seen order
            let mut groups: Vec<(&str, Vec<&dyn Indexable>)> = Vec::new();
            for obj in chunk {
                match groups.iter_mut().find(|(label, _)| *label == obj.model()) {
                    Some((_, items)) => items.push(obj),
                    None => groups.push((obj.model(), vec![obj as &dyn Indexable])),
                }
            }
            for (label, items) in groups {
                index.add_items(label, &items).await?;
            }
        }

        rebuilder.finish().await?;
        info!(alias = %self.alias, index = index.name(), model, "Rebuild finished");
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Lifecycle helpers
// ═══════════════════════════════════════════════════════════════════════════

fn error_chain(err: &SearchError) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

/// Index `obj` in every backend. Failures are logged and never returned.
pub async fn insert_or_update_object(backends: &[Arc<SearchBackend>], obj: &dyn Indexable) {
    for backend in backends {
        if let Err(e) = backend.add(obj).await {
            error!(
                backend = %backend.alias(),
                error = %error_chain(&e),
                "Exception raised while adding {} into the '{}' search backend",
                obj.describe(),
                backend.alias()
            );
            metrics::record_lifecycle_error(backend.adapter().kind(), "add");
        }
    }
}

/// Remove `obj` from every backend. Failures are logged and never returned.
pub async fn remove_object(backends: &[Arc<SearchBackend>], obj: &dyn Indexable) {
    for backend in backends {
        if let Err(e) = backend.delete(obj).await {
            error!(
                backend = %backend.alias(),
                error = %error_chain(&e),
                "Exception raised while deleting {} from the '{}' search backend",
                obj.describe(),
                backend.alias()
            );
            metrics::record_lifecycle_error(backend.adapter().kind(), "delete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::cluster::{ClusterBackend, InMemoryCluster};
    use crate::index::{AttributeKind, AttributeValue, IndexField, ModelSpec};
    use crate::storage::InMemoryStore;

    #[derive(Debug, Clone)]
    struct Book {
        id: u32,
        title: &'static str,
    }

    impl Indexable for Book {
        fn model(&self) -> &str {
            "lib.Book"
        }
        fn pk(&self) -> String {
            self.id.to_string()
        }
        fn attribute(&self, name: &str) -> Option<AttributeValue<'_>> {
            (name == "title").then(|| AttributeValue::from_value(self.title))
        }
    }

    struct Unregistered;

    impl Indexable for Unregistered {
        fn model(&self) -> &str {
            "lib.Nope"
        }
        fn pk(&self) -> String {
            "1".into()
        }
        fn attribute(&self, _name: &str) -> Option<AttributeValue<'_>> {
            None
        }
    }

    fn setup() -> (Arc<InMemoryCluster>, SearchBackend, QuerySet<Book>) {
        let mut registry = ModelRegistry::new();
        registry
            .register(
                ModelSpec::new("lib", "Book")
                    .attribute("title", AttributeKind::Char)
                    .search_field(IndexField::search("title")),
            )
            .unwrap();
        let cluster = Arc::new(InMemoryCluster::new());
        let adapter = ClusterBackend::new(cluster.clone(), Arc::new(registry), "search");
        let backend = SearchBackend::new("default", Arc::new(adapter));
        let store = Arc::new(InMemoryStore::<Book>::new());
        (cluster, backend, QuerySet::new("lib.Book", store))
    }

    #[test]
    fn test_options_default_to_relevance() {
        let options = SearchOptions::default();
        assert!(options.order_by_relevance);
        assert_eq!(options.fields, None);
        assert_eq!(SearchOptions::new().operator(Operator::And).operator, Some(Operator::And));
    }

    #[tokio::test]
    async fn test_blank_text_is_empty_without_requests() {
        let (cluster, backend, books) = setup();
        let mut results = backend.search("   ", books, SearchOptions::new()).await.unwrap();
        assert_eq!(results.count().await.unwrap(), 0);
        assert!(cluster.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unindexed_model_is_empty() {
        let (_, backend, _) = setup();
        let queryset: QuerySet<Book> = QuerySet::new("lib.Nope", Arc::new(InMemoryStore::<Book>::new()));
        let mut results = backend.search("dune", queryset, SearchOptions::new()).await.unwrap();
        assert!(results.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_field_fails_before_io() {
        let (cluster, backend, books) = setup();
        let err = backend
            .search("dune", books, SearchOptions::new().fields(["author"]))
            .await
            .unwrap_err();
        assert_eq!(err.field_name(), Some("author"));
        assert!(cluster.requests().is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_helpers_swallow_errors() {
        let (cluster, backend, _) = setup();
        let backends = vec![Arc::new(backend)];
        // Index was never created; the in-memory cluster rejects the write
        insert_or_update_object(&backends, &Book { id: 1, title: "Dune" }).await;
        remove_object(&backends, &Book { id: 1, title: "Dune" }).await;
        insert_or_update_object(&backends, &Unregistered).await;
        assert!(cluster.indices().is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_index() {
        let (cluster, backend, _) = setup();
        let books = vec![Book { id: 1, title: "Dune" }, Book { id: 2, title: "Emma" }];
        backend.rebuild_index("lib.Book", &books).await.unwrap();
        assert_eq!(cluster.documents("search__lib_book").len(), 2);
    }
}
