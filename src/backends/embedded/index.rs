// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite-backed index.
//!
//! # Schema
//!
//! ```sql
//! search_index_entry(id, index_name, root_type, object_id, content_types, document)
//! search_index_fts(body, autocomplete)   -- FTS5, rowid = search_index_entry.id
//! ```
//!
//! `document` holds the same JSON document a cluster would index, so filters
//! and ordering read their columns with `json_extract`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use sqlx::Row;
use tracing::{debug, info};

use crate::backends::index::SearchIndex;
use crate::error::{Result, SearchError};
use crate::index::{Indexable, ModelMapping, ModelRegistry};
use crate::metrics;

const BACKEND: &str = "embedded";

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS search_index_entry (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        index_name TEXT NOT NULL,
        root_type TEXT NOT NULL,
        object_id TEXT NOT NULL,
        content_types TEXT NOT NULL,
        document TEXT NOT NULL,
        UNIQUE (index_name, root_type, object_id)
    )",
    "CREATE VIRTUAL TABLE IF NOT EXISTS search_index_fts
        USING fts5(body, autocomplete, tokenize = 'unicode61 remove_diacritics 2')",
];

/// Create the shared tables if missing
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// All models share one named index in the entry table
#[derive(Clone)]
pub struct EmbeddedIndex {
    name: String,
    pool: SqlitePool,
    registry: Arc<ModelRegistry>,
}

impl EmbeddedIndex {
    pub fn new(name: impl Into<String>, pool: SqlitePool, registry: Arc<ModelRegistry>) -> Self {
        Self {
            name: name.into(),
            pool,
            registry,
        }
    }

    /// Number of indexed objects
    pub async fn len(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM search_index_entry WHERE index_name = ?")
            .bind(self.name.as_str())
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("n")?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    fn root_label(&self, model: &str) -> Result<String> {
        self.registry
            .root_of(model)
            .map(|root| root.label())
            .ok_or_else(|| SearchError::Configuration(format!("model {model} is not registered")))
    }

    async fn upsert(&self, conn: &mut SqliteConnection, item: &dyn Indexable) -> Result<()> {
        let mapping = ModelMapping::new(&self.registry, item.model())?;
        let root = self.root_label(item.model())?;
        let document = mapping.get_document(item).to_string();
        let content_types = json!(mapping.all_content_types()).to_string();
        let text = mapping.text_content(item);

        let row = sqlx::query(
            "INSERT INTO search_index_entry (index_name, root_type, object_id, content_types, document)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (index_name, root_type, object_id)
             DO UPDATE SET content_types = excluded.content_types, document = excluded.document
             RETURNING id",
        )
        .bind(self.name.as_str())
        .bind(root)
        .bind(item.pk())
        .bind(content_types)
        .bind(document)
        .fetch_one(&mut *conn)
        .await?;
        let id: i64 = row.try_get("id")?;

        sqlx::query("DELETE FROM search_index_fts WHERE rowid = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("INSERT INTO search_index_fts (rowid, body, autocomplete) VALUES (?, ?, ?)")
            .bind(id)
            .bind(text.body.join(" "))
            .bind(text.autocomplete.join(" "))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn write_items(&self, items: &[&dyn Indexable]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for item in items {
            self.upsert(&mut tx, *item).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

impl std::fmt::Debug for EmbeddedIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedIndex").field("name", &self.name).finish()
    }
}

#[async_trait]
impl SearchIndex for EmbeddedIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self) -> Result<()> {
        let outcome = ensure_schema(&self.pool).await;
        metrics::record_index_operation(BACKEND, "create", outcome.is_ok());
        outcome?;
        info!(index = %self.name, "Index created");
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        let outcome = async {
            let mut tx = self.pool.begin().await?;
            sqlx::query(
                "DELETE FROM search_index_fts
                 WHERE rowid IN (SELECT id FROM search_index_entry WHERE index_name = ?)",
            )
            .bind(self.name.as_str())
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM search_index_entry WHERE index_name = ?")
                .bind(self.name.as_str())
                .execute(&mut *tx)
                .await?;
            tx.commit().await
        }
        .await;
        metrics::record_index_operation(BACKEND, "delete", outcome.is_ok());
        outcome?;
        info!(index = %self.name, "Index deleted");
        Ok(())
    }

    async fn refresh(&self) -> Result<()> {
        // Committed rows are visible immediately
        Ok(())
    }

    async fn add_model(&self, model: &str) -> Result<()> {
        ModelMapping::new(&self.registry, model)?;
        debug!(index = %self.name, model, "Model uses the shared schema");
        Ok(())
    }

    async fn add_item(&self, item: &dyn Indexable) -> Result<()> {
        if !self.registry.is_indexed(item.model()) {
            return Ok(());
        }
        let outcome = self.write_items(&[item]).await;
        metrics::record_index_operation(BACKEND, "index", outcome.is_ok());
        outcome
    }

    async fn add_items(&self, model: &str, items: &[&dyn Indexable]) -> Result<()> {
        if !self.registry.is_indexed(model) || items.is_empty() {
            return Ok(());
        }
        metrics::record_bulk_size(BACKEND, items.len());
        let outcome = self.write_items(items).await;
        metrics::record_index_operation(BACKEND, "bulk", outcome.is_ok());
        outcome?;
        debug!(index = %self.name, model, count = items.len(), "Bulk indexed");
        Ok(())
    }

    async fn delete_item(&self, item: &dyn Indexable) -> Result<()> {
        if !self.registry.is_indexed(item.model()) {
            return Ok(());
        }
        let root = self.root_label(item.model())?;
        let pk = item.pk();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM search_index_fts WHERE rowid IN (
                SELECT id FROM search_index_entry WHERE index_name = ? AND root_type = ? AND object_id = ?
            )",
        )
        .bind(self.name.as_str())
        .bind(root.as_str())
        .bind(pk.as_str())
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM search_index_entry WHERE index_name = ? AND root_type = ? AND object_id = ?")
            .bind(self.name.as_str())
            .bind(root.as_str())
            .bind(pk.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
