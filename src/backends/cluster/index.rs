// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cluster index handle.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use super::transport::{BulkAction, ClusterTransport, TransportError};
use crate::backends::index::SearchIndex;
use crate::error::Result;
use crate::index::{Indexable, ModelMapping, ModelRegistry};
use crate::metrics;

const BACKEND: &str = "cluster";

/// One named index (or alias) on a cluster
#[derive(Clone)]
pub struct ClusterIndex {
    name: String,
    transport: Arc<dyn ClusterTransport>,
    registry: Arc<ModelRegistry>,
    settings: Arc<Value>,
}

impl ClusterIndex {
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn ClusterTransport>,
        registry: Arc<ModelRegistry>,
        settings: Arc<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            registry,
            settings,
        }
    }

    /// Handle on another index of the same cluster
    #[must_use]
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    pub async fn exists(&self) -> Result<bool> {
        Ok(self.transport.index_exists(&self.name).await?)
    }

    pub async fn is_alias(&self) -> Result<bool> {
        Ok(self.transport.alias_exists(&self.name).await?)
    }

    /// Indices this alias points to. Empty for a plain index.
    pub async fn aliased_indices(&self) -> Result<Vec<ClusterIndex>> {
        match self.transport.get_alias(&self.name).await {
            Ok(names) => Ok(names.into_iter().map(|name| self.sibling(name)).collect()),
            Err(TransportError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Point alias `name` at this index
    pub async fn put_alias(&self, name: &str) -> Result<()> {
        self.transport.put_alias(&self.name, name).await?;
        info!(index = %self.name, alias = %name, "Alias created");
        Ok(())
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn ClusterTransport> {
        &self.transport
    }

    fn record<T>(&self, operation: &str, outcome: &std::result::Result<T, TransportError>) {
        metrics::record_index_operation(BACKEND, operation, outcome.is_ok());
    }
}

impl std::fmt::Debug for ClusterIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterIndex").field("name", &self.name).finish()
    }
}

#[async_trait]
impl SearchIndex for ClusterIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self) -> Result<()> {
        let outcome = self.transport.create_index(&self.name, &self.settings).await;
        self.record("create", &outcome);
        outcome?;
        info!(index = %self.name, "Index created");
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        let outcome = self.transport.delete_index(&self.name).await;
        self.record("delete", &outcome);
        match outcome {
            Ok(()) => {
                info!(index = %self.name, "Index deleted");
                Ok(())
            }
            Err(TransportError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn refresh(&self) -> Result<()> {
        let outcome = self.transport.refresh_index(&self.name).await;
        self.record("refresh", &outcome);
        Ok(outcome?)
    }

    async fn add_model(&self, model: &str) -> Result<()> {
        if !self.registry.is_indexed(model) {
            return Ok(());
        }
        let mapping = ModelMapping::new(&self.registry, model)?.get_mapping()?;
        let outcome = self.transport.put_mapping(&self.name, &mapping).await;
        self.record("mapping", &outcome);
        outcome?;
        debug!(index = %self.name, model, "Mapping updated");
        Ok(())
    }

    async fn add_item(&self, item: &dyn Indexable) -> Result<()> {
        if !self.registry.is_indexed(item.model()) {
            return Ok(());
        }
        let mapping = ModelMapping::new(&self.registry, item.model())?;
        let outcome = self
            .transport
            .index_document(&self.name, &ModelMapping::document_id(item), &mapping.get_document(item))
            .await;
        self.record("index", &outcome);
        Ok(outcome?)
    }

    async fn add_items(&self, model: &str, items: &[&dyn Indexable]) -> Result<()> {
        if !self.registry.is_indexed(model) {
            return Ok(());
        }

        let mut actions = Vec::with_capacity(items.len());
        for item in items {
            // Subtype instances carry their own fields
            let mapping = ModelMapping::new(&self.registry, item.model())?;
            actions.push(BulkAction {
                id: ModelMapping::document_id(*item),
                document: mapping.get_document(*item),
            });
        }
        if actions.is_empty() {
            return Ok(());
        }

        metrics::record_bulk_size(BACKEND, actions.len());
        let outcome = self.transport.bulk(&self.name, &actions).await;
        self.record("bulk", &outcome);
        outcome?;
        debug!(index = %self.name, model, count = actions.len(), "Bulk indexed");
        Ok(())
    }

    async fn delete_item(&self, item: &dyn Indexable) -> Result<()> {
        if !self.registry.is_indexed(item.model()) {
            return Ok(());
        }
        match self
            .transport
            .delete_document(&self.name, &ModelMapping::document_id(item))
            .await
        {
            Ok(()) | Err(TransportError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
