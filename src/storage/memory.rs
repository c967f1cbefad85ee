// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{ObjectStore, StoreError};
use crate::index::{Indexable, ModelRegistry};

/// Process-local object store keyed by (model, primary key).
///
/// With a registry attached, fetching a model also returns objects of its
/// registered subtypes.
pub struct InMemoryStore<T> {
    data: DashMap<(String, String), T>,
    registry: Option<Arc<ModelRegistry>>,
}

impl<T: Indexable + Clone> InMemoryStore<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            registry: None,
        }
    }

    #[must_use]
    pub fn with_registry(registry: Arc<ModelRegistry>) -> Self {
        Self {
            data: DashMap::new(),
            registry: Some(registry),
        }
    }

    /// Insert or replace an object
    pub fn insert(&self, obj: T) {
        self.data.insert((obj.model().to_string(), obj.pk()), obj);
    }

    /// Remove an object, returning it if present
    pub fn remove(&self, model: &str, pk: &str) -> Option<T> {
        self.data
            .remove(&(model.to_string(), pk.to_string()))
            .map(|(_, obj)| obj)
    }

    /// Get current object count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Clear all objects
    pub fn clear(&self) {
        self.data.clear();
    }

    fn matches_model(&self, stored: &str, requested: &str) -> bool {
        match &self.registry {
            Some(registry) => registry.is_subtype(stored, requested),
            None => stored == requested,
        }
    }

    fn collect(&self, model: &str, keep: impl Fn(&str) -> bool) -> Vec<T> {
        let mut found: Vec<((String, String), T)> = self
            .data
            .iter()
            .filter(|entry| self.matches_model(&entry.key().0, model) && keep(&entry.key().1))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found.into_iter().map(|(_, obj)| obj).collect()
    }
}

impl<T: Indexable + Clone> Default for InMemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Indexable + Clone + 'static> ObjectStore<T> for InMemoryStore<T> {
    async fn fetch_by_pks(&self, model: &str, pks: &[String]) -> Result<Vec<T>, StoreError> {
        Ok(self.collect(model, |pk| pks.iter().any(|wanted| wanted == pk)))
    }

    async fn all(&self, model: &str) -> Result<Vec<T>, StoreError> {
        Ok(self.collect(model, |_| true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{AttributeKind, AttributeValue, IndexField, ModelSpec};

    #[derive(Clone, Debug)]
    struct Doc {
        model: &'static str,
        id: u32,
    }

    impl Indexable for Doc {
        fn model(&self) -> &str {
            self.model
        }
        fn pk(&self) -> String {
            self.id.to_string()
        }
        fn attribute(&self, _name: &str) -> Option<AttributeValue<'_>> {
            None
        }
    }

    fn doc(model: &'static str, id: u32) -> Doc {
        Doc { model, id }
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store: InMemoryStore<Doc> = InMemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_fetch_by_pks_skips_missing() {
        let store = InMemoryStore::new();
        store.insert(doc("app.Book", 1));
        store.insert(doc("app.Book", 2));

        let found = store
            .fetch_by_pks("app.Book", &["2".into(), "99".into()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 2);
    }

    #[tokio::test]
    async fn test_models_are_separate_without_registry() {
        let store = InMemoryStore::new();
        store.insert(doc("app.Book", 1));
        store.insert(doc("app.Author", 1));

        let found = store.fetch_by_pks("app.Author", &["1".into()]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].model, "app.Author");
    }

    #[tokio::test]
    async fn test_registry_includes_subtypes() {
        let mut registry = ModelRegistry::new();
        registry
            .register(
                ModelSpec::new("app", "Book")
                    .attribute("title", AttributeKind::Char)
                    .search_field(IndexField::search("title")),
            )
            .unwrap();
        registry
            .register(ModelSpec::new("app", "Novel").parent("app.Book"))
            .unwrap();

        let store = InMemoryStore::with_registry(Arc::new(registry));
        store.insert(doc("app.Book", 1));
        store.insert(doc("app.Novel", 2));

        assert_eq!(store.all("app.Book").await.unwrap().len(), 2);
        assert_eq!(store.all("app.Novel").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let store = InMemoryStore::new();
        store.insert(doc("app.Book", 1));
        assert!(store.remove("app.Book", "1").is_some());
        assert!(store.remove("app.Book", "1").is_none());
        assert!(store.is_empty());
    }
}
