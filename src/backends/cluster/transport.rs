// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Wire boundary of the cluster backend.
//!
//! Everything the backend needs from an Elasticsearch/OpenSearch-style
//! cluster, as request/response calls on JSON bodies. Implementations own
//! timeouts, retries and connection pooling.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Cluster resource not found: {0}")]
    NotFound(String),
    #[error("Cluster returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Cluster request failed: {0}")]
    Request(String),
    #[error("Could not decode cluster response: {0}")]
    Decode(String),
}

impl TransportError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::NotFound(_))
    }
}

/// One document of a bulk upsert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkAction {
    pub id: String,
    pub document: Value,
}

/// One step of an atomic alias update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasAction {
    Add { index: String, alias: String },
    Remove { index: String, alias: String },
}

#[async_trait]
pub trait ClusterTransport: Send + Sync {
    /// Create an index with a settings/mappings body
    async fn create_index(&self, index: &str, body: &Value) -> Result<(), TransportError>;

    /// Delete an index. `NotFound` when nothing has that name.
    async fn delete_index(&self, index: &str) -> Result<(), TransportError>;

    /// True for an index or an alias of that name
    async fn index_exists(&self, index: &str) -> Result<bool, TransportError>;

    async fn refresh_index(&self, index: &str) -> Result<(), TransportError>;

    async fn put_mapping(&self, index: &str, mapping: &Value) -> Result<(), TransportError>;

    /// Upsert one document
    async fn index_document(&self, index: &str, id: &str, document: &Value) -> Result<(), TransportError>;

    /// Upsert many documents in one request
    async fn bulk(&self, index: &str, actions: &[BulkAction]) -> Result<(), TransportError>;

    /// Delete one document. `NotFound` when absent.
    async fn delete_document(&self, index: &str, id: &str) -> Result<(), TransportError>;

    /// Run a search body. With `scroll` set the response carries `_scroll_id`.
    async fn search(&self, index: &str, body: &Value, scroll: Option<&str>) -> Result<Value, TransportError>;

    /// Number of documents matching the `query` of `body`
    async fn count(&self, index: &str, body: &Value) -> Result<u64, TransportError>;

    /// Next page of a scroll cursor
    async fn scroll(&self, scroll_id: &str, keep_alive: &str) -> Result<Value, TransportError>;

    /// Release a scroll cursor
    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), TransportError>;

    async fn alias_exists(&self, name: &str) -> Result<bool, TransportError>;

    /// Indices an alias points to
    async fn get_alias(&self, name: &str) -> Result<Vec<String>, TransportError>;

    async fn put_alias(&self, index: &str, name: &str) -> Result<(), TransportError>;

    /// Apply all actions as one atomic change
    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), TransportError>;
}
