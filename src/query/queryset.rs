// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Store-backed queryset: the model being searched, the store that re-hydrates
//! hits, and the filtering/ordering to push down into the search backend.

use std::sync::Arc;

use super::predicate::{OrderBy, Predicate};
use crate::storage::traits::{ObjectStore, StoreError};

pub struct QuerySet<T> {
    model: String,
    store: Arc<dyn ObjectStore<T>>,
    predicate: Option<Predicate>,
    order_by: Vec<OrderBy>,
}

impl<T> Clone for QuerySet<T> {
    fn clone(&self) -> Self {
        Self {
            model: self.model.clone(),
            store: Arc::clone(&self.store),
            predicate: self.predicate.clone(),
            order_by: self.order_by.clone(),
        }
    }
}

impl<T> std::fmt::Debug for QuerySet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySet")
            .field("model", &self.model)
            .field("predicate", &self.predicate)
            .field("order_by", &self.order_by)
            .finish()
    }
}

impl<T> QuerySet<T> {
    /// All objects of `model` (label, e.g. `"searchtests.Book"`)
    pub fn new(model: impl Into<String>, store: Arc<dyn ObjectStore<T>>) -> Self {
        Self {
            model: model.into(),
            store,
            predicate: None,
            order_by: Vec::new(),
        }
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Narrow with `predicate`, ANDed onto any existing filter
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Drop objects matching `predicate`
    #[must_use]
    pub fn exclude(self, predicate: Predicate) -> Self {
        self.filter(predicate.negate())
    }

    /// Replace the ordering. Accepts `OrderBy` values or `"-field"` strings.
    #[must_use]
    pub fn order_by<O: Into<OrderBy>>(mut self, order: impl IntoIterator<Item = O>) -> Self {
        self.order_by = order.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    #[must_use]
    pub fn ordering(&self) -> &[OrderBy] {
        &self.order_by
    }

    #[must_use]
    pub fn is_ordered(&self) -> bool {
        !self.order_by.is_empty()
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ObjectStore<T>> {
        &self.store
    }

    /// Fetch objects of this queryset's model by primary key (unordered).
    pub async fn fetch_by_pks(&self, pks: &[String]) -> Result<Vec<T>, StoreError> {
        self.store.fetch_by_pks(&self.model, pks).await
    }

    /// Every object of this queryset's model
    pub async fn all(&self) -> Result<Vec<T>, StoreError> {
        self.store.all(&self.model).await
    }
}
