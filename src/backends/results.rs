// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Lazy search results.
//!
//! A [`ResultSet`] holds a compiled query (behind a [`SearchExecutor`]) and a
//! window. Nothing runs until `results()`/`count()`; after that the result set
//! only works on its caches.
//!
//! ```text
//! unexecuted ──results()/count()──▶ materialized
//!     │                                  │
//!  slice(): narrows window          slice(): slices cache
//! ```

use std::collections::HashMap;
use std::ops::{Bound, RangeBounds};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, SearchError};
use crate::index::Indexable;
use crate::metrics;
use crate::query::QuerySet;

/// `[start, stop)` window over the ranked hits. Slices compose by narrowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    pub start: usize,
    pub stop: Option<usize>,
}

impl Window {
    /// Apply a slice given relative to the current window. The stop only ever
    /// shrinks and the start only ever grows, never past the stop.
    pub fn set_limits(&mut self, start: Option<usize>, stop: Option<usize>) {
        if let Some(stop) = stop {
            let stop = self.start.saturating_add(stop);
            self.stop = Some(match self.stop {
                Some(existing) => existing.min(stop),
                None => stop,
            });
        }

        if let Some(start) = start {
            let start = self.start.saturating_add(start);
            self.start = match self.stop {
                Some(stop) => stop.min(start),
                None => start,
            };
        }
    }

    /// Number of hits the window admits, `None` when unbounded
    #[must_use]
    pub fn limit(&self) -> Option<usize> {
        self.stop.map(|stop| stop.saturating_sub(self.start))
    }

    /// Clamp a total hit count to this window
    #[must_use]
    pub fn clamp_count(&self, total: usize) -> usize {
        let count = total.saturating_sub(self.start);
        match self.limit() {
            Some(limit) => count.min(limit),
            None => count,
        }
    }
}

fn bounds(range: &impl RangeBounds<usize>) -> (Option<usize>, Option<usize>) {
    let start = match range.start_bound() {
        Bound::Included(&s) => Some(s),
        Bound::Excluded(&s) => Some(s.saturating_add(1)),
        Bound::Unbounded => None,
    };
    let stop = match range.end_bound() {
        Bound::Included(&e) => Some(e.saturating_add(1)),
        Bound::Excluded(&e) => Some(e),
        Bound::Unbounded => None,
    };
    (start, stop)
}

/// One ranked hit
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub pk: String,
    pub score: Option<f64>,
}

/// Facet buckets in backend order. `None` is the missing-value bucket.
pub type FacetCounts = Vec<(Option<Value>, u64)>;

/// A compiled query bound to one backend
#[async_trait]
pub trait SearchExecutor: Send + Sync {
    /// Backend kind, used for metrics labels
    fn backend(&self) -> &'static str;

    /// Ranked hits inside `window`
    async fn fetch(&self, window: Window) -> Result<Vec<Hit>>;

    /// Total number of matches, ignoring any window
    async fn count(&self) -> Result<usize>;

    /// Document counts per distinct value of a filterable field
    async fn facet(&self, _field_name: &str) -> Result<FacetCounts> {
        Err(SearchError::NotSupported(
            "This search backend does not support faceting".to_string(),
        ))
    }
}

/// Lazily evaluated, sliceable search results
pub struct ResultSet<T> {
    executor: Option<Arc<dyn SearchExecutor>>,
    queryset: Option<QuerySet<T>>,
    window: Window,
    score_field: Option<String>,
    results_cache: Option<Vec<T>>,
    count_cache: Option<usize>,
}

impl<T: Indexable + Clone> Clone for ResultSet<T> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            queryset: self.queryset.clone(),
            window: self.window,
            score_field: self.score_field.clone(),
            results_cache: self.results_cache.clone(),
            count_cache: self.count_cache,
        }
    }
}

impl<T: Indexable + Clone> ResultSet<T> {
    pub fn new(executor: Arc<dyn SearchExecutor>, queryset: QuerySet<T>) -> Self {
        Self {
            executor: Some(executor),
            queryset: Some(queryset),
            window: Window::default(),
            score_field: None,
            results_cache: None,
            count_cache: None,
        }
    }

    /// Result set that never touches a backend
    #[must_use]
    pub fn empty() -> Self {
        Self {
            executor: None,
            queryset: None,
            window: Window::default(),
            score_field: None,
            results_cache: None,
            count_cache: None,
        }
    }

    /// Label of the searched model. `None` for the empty result set.
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.queryset.as_ref().map(QuerySet::model)
    }

    #[must_use]
    pub fn window(&self) -> Window {
        self.window
    }

    #[must_use]
    pub fn is_materialized(&self) -> bool {
        self.results_cache.is_some()
    }

    fn clone_options(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            queryset: self.queryset.clone(),
            window: self.window,
            score_field: self.score_field.clone(),
            results_cache: None,
            count_cache: None,
        }
    }

    /// Narrow the window. Offsets are relative to the current window; once
    /// materialized the cached list is sliced instead of re-querying.
    #[must_use]
    pub fn slice(&self, range: impl RangeBounds<usize>) -> Self {
        let (start, stop) = bounds(&range);
        let mut new = self.clone_options();
        new.window.set_limits(start, stop);

        if let Some(cache) = &self.results_cache {
            let len = cache.len();
            let from = start.unwrap_or(0).min(len);
            let to = stop.unwrap_or(len).min(len).max(from);
            new.results_cache = Some(cache[from..to].to_vec());
        }
        new
    }

    /// Tag every hydrated object with its relevance score under `field_name`.
    #[must_use]
    pub fn annotate_score(&self, field_name: impl Into<String>) -> Self {
        let mut new = self.clone_options();
        new.score_field = Some(field_name.into());
        new
    }

    /// Execute (once) and return the hydrated objects in rank order.
    pub async fn results(&mut self) -> Result<&[T]> {
        if self.results_cache.is_none() {
            let results = self.do_search().await?;
            self.results_cache = Some(results);
        }
        Ok(self.results_cache.as_deref().unwrap_or_default())
    }

    /// Consume the result set, returning the hydrated objects.
    pub async fn into_vec(mut self) -> Result<Vec<T>> {
        self.results().await?;
        Ok(self.results_cache.unwrap_or_default())
    }

    /// Number of hydrated results
    pub async fn len(&mut self) -> Result<usize> {
        Ok(self.results().await?.len())
    }

    pub async fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Hit count within the window. Cached; taken from the results cache when present.
    pub async fn count(&mut self) -> Result<usize> {
        if let Some(count) = self.count_cache {
            return Ok(count);
        }
        let count = match (&self.results_cache, &self.executor) {
            (Some(cache), _) => cache.len(),
            (None, Some(executor)) => self.window.clamp_count(executor.count().await?),
            (None, None) => 0,
        };
        self.count_cache = Some(count);
        Ok(count)
    }

    /// Object at `index` (relative to the window), if any.
    pub async fn get(&self, index: usize) -> Result<Option<T>> {
        if let Some(cache) = &self.results_cache {
            return Ok(cache.get(index).cloned());
        }
        let mut single = self.clone_options();
        single.window.set_limits(Some(index), Some(index.saturating_add(1)));
        if single.window.limit() == Some(0) {
            return Ok(None);
        }
        Ok(single.into_vec().await?.into_iter().next())
    }

    /// Document counts per value of the filterable field `field_name`.
    pub async fn facet(&self, field_name: &str) -> Result<FacetCounts> {
        match &self.executor {
            Some(executor) => executor.facet(field_name).await,
            None => Ok(Vec::new()),
        }
    }

    async fn do_search(&self) -> Result<Vec<T>> {
        let (Some(executor), Some(queryset)) = (&self.executor, &self.queryset) else {
            return Ok(Vec::new());
        };

        let started = Instant::now();
        let hits = executor.fetch(self.window).await?;
        metrics::record_search_latency(executor.backend(), "fetch", started.elapsed());
        if hits.is_empty() {
            metrics::record_search_results(0);
            return Ok(Vec::new());
        }

        let pks: Vec<String> = hits.iter().map(|hit| hit.pk.clone()).collect();
        let mut by_pk: HashMap<String, T> = queryset
            .fetch_by_pks(&pks)
            .await?
            .into_iter()
            .map(|obj| (obj.pk(), obj))
            .collect();

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            // Stale index entries have no stored object
            let Some(mut obj) = by_pk.remove(&hit.pk) else {
                continue;
            };
            if let Some(field) = &self.score_field {
                obj.set_score(field, hit.score);
            }
            results.push(obj);
        }

        debug!(
            model = %queryset.model(),
            hits = pks.len(),
            hydrated = results.len(),
            "Search results hydrated"
        );
        metrics::record_search_results(results.len());
        Ok(results)
    }
}

impl<T> std::fmt::Debug for ResultSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSet")
            .field("model", &self.queryset.as_ref().map(QuerySet::model))
            .field("window", &self.window)
            .field("score_field", &self.score_field)
            .field("materialized", &self.results_cache.is_some())
            .field("count", &self.count_cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::AttributeValue;
    use crate::storage::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, PartialEq)]
    struct Item {
        id: u32,
        score: Option<f64>,
    }

    impl Indexable for Item {
        fn model(&self) -> &str {
            "tests.Item"
        }
        fn pk(&self) -> String {
            self.id.to_string()
        }
        fn attribute(&self, _name: &str) -> Option<AttributeValue<'_>> {
            None
        }
        fn set_score(&mut self, _attribute: &str, score: Option<f64>) {
            self.score = score;
        }
    }

    /// Returns pks "1".."=total" in descending score order and counts calls.
    struct FixedExecutor {
        ranked: Vec<u32>,
        fetches: AtomicUsize,
        counts: AtomicUsize,
    }

    #[async_trait]
    impl SearchExecutor for FixedExecutor {
        fn backend(&self) -> &'static str {
            "fixed"
        }

        async fn fetch(&self, window: Window) -> Result<Vec<Hit>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let end = window.stop.unwrap_or(self.ranked.len()).min(self.ranked.len());
            let start = window.start.min(end);
            Ok(self.ranked[start..end]
                .iter()
                .map(|id| Hit {
                    pk: id.to_string(),
                    score: Some(f64::from(*id) / 10.0),
                })
                .collect())
        }

        async fn count(&self) -> Result<usize> {
            self.counts.fetch_add(1, Ordering::SeqCst);
            Ok(self.ranked.len())
        }
    }

    fn setup(ranked: Vec<u32>, stored: &[u32]) -> (Arc<FixedExecutor>, ResultSet<Item>) {
        let store = Arc::new(InMemoryStore::new());
        for id in stored {
            store.insert(Item { id: *id, score: None });
        }
        let executor = Arc::new(FixedExecutor {
            ranked,
            fetches: AtomicUsize::new(0),
            counts: AtomicUsize::new(0),
        });
        let queryset: QuerySet<Item> = QuerySet::new("tests.Item", store);
        let results = ResultSet::new(executor.clone(), queryset);
        (executor, results)
    }

    #[test]
    fn test_window_composition() {
        let mut window = Window::default();
        window.set_limits(Some(10), Some(20));
        assert_eq!(window, Window { start: 10, stop: Some(20) });
        window.set_limits(Some(5), Some(8));
        assert_eq!(window, Window { start: 15, stop: Some(18) });
        // widening is ignored
        window.set_limits(None, Some(100));
        assert_eq!(window.stop, Some(18));
        window.set_limits(Some(50), None);
        assert_eq!(window.start, 18);
    }

    #[test]
    fn test_clamp_count() {
        let window = Window { start: 5, stop: Some(8) };
        assert_eq!(window.clamp_count(100), 3);
        assert_eq!(window.clamp_count(6), 1);
        assert_eq!(window.clamp_count(2), 0);
        assert_eq!(Window::default().clamp_count(7), 7);
    }

    #[tokio::test]
    async fn test_results_keep_rank_order_and_drop_missing() {
        let (_, mut results) = setup(vec![3, 1, 4, 2], &[1, 2, 3]);
        let ids: Vec<u32> = results.results().await.unwrap().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn test_results_are_cached() {
        let (executor, mut results) = setup(vec![1, 2], &[1, 2]);
        results.results().await.unwrap();
        results.results().await.unwrap();
        assert_eq!(executor.fetches.load(Ordering::SeqCst), 1);

        // count after materialization uses the cache
        assert_eq!(results.count().await.unwrap(), 2);
        assert_eq!(executor.counts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_count_is_memoized_and_clamped() {
        let (executor, results) = setup(vec![1, 2, 3, 4, 5], &[1, 2, 3, 4, 5]);
        let mut page = results.slice(1..3);
        assert_eq!(page.count().await.unwrap(), 2);
        assert_eq!(page.count().await.unwrap(), 2);
        assert_eq!(executor.counts.load(Ordering::SeqCst), 1);
        assert_eq!(page.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_slice_after_materialization_uses_cache() {
        let (executor, mut results) = setup(vec![1, 2, 3, 4], &[1, 2, 3, 4]);
        results.results().await.unwrap();
        let mut tail = results.slice(2..);
        let ids: Vec<u32> = tail.results().await.unwrap().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(executor.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_by_index() {
        let (_, results) = setup(vec![9, 8, 7], &[7, 8, 9]);
        let page = results.slice(1..);
        assert_eq!(page.get(0).await.unwrap().map(|i| i.id), Some(8));
        assert_eq!(page.get(5).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_stays_inside_bounded_slice() {
        let ids: Vec<u32> = (1..=10).collect();
        let (executor, results) = setup(ids.clone(), &ids);
        let page = results.slice(0..2);
        assert_eq!(page.get(1).await.unwrap().map(|i| i.id), Some(2));
        assert_eq!(page.get(5).await.unwrap(), None);
        assert_eq!(results.slice(3..6).get(3).await.unwrap(), None);
        // Out-of-window lookups never reach the backend
        assert_eq!(executor.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slice_to_max_bound_does_not_overflow() {
        let (_, results) = setup(vec![1, 2, 3], &[1, 2, 3]);
        let mut all = results.slice(..=usize::MAX);
        assert_eq!(all.window(), Window { start: 0, stop: Some(usize::MAX) });
        assert_eq!(all.len().await.unwrap(), 3);

        let mut tail = results.slice((Bound::Excluded(usize::MAX), Bound::Unbounded));
        assert!(tail.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_annotate_score() {
        let (_, results) = setup(vec![5], &[5]);
        let mut scored = results.annotate_score("_score");
        let items = scored.results().await.unwrap();
        assert_eq!(items[0].score, Some(0.5));
    }

    #[tokio::test]
    async fn test_empty_result_set() {
        let mut results: ResultSet<Item> = ResultSet::empty();
        assert_eq!(results.count().await.unwrap(), 0);
        assert!(results.results().await.unwrap().is_empty());
        assert!(results.facet("anything").await.unwrap().is_empty());
        assert_eq!(results.model(), None);
    }

    #[tokio::test]
    async fn test_facet_unsupported_by_default() {
        let (_, results) = setup(vec![], &[]);
        let err = results.facet("genre").await.unwrap_err();
        assert!(matches!(err, SearchError::NotSupported(_)));
    }
}
