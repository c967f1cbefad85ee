// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Execution of compiled embedded queries.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::debug;

use super::bind_params;
use super::compiler::CompiledSql;
use crate::backends::results::{FacetCounts, Hit, SearchExecutor, Window};
use crate::error::{Result, SearchError};
use crate::metrics;

pub struct EmbeddedExecutor {
    pool: SqlitePool,
    compiled: CompiledSql,
}

impl EmbeddedExecutor {
    pub fn new(pool: SqlitePool, compiled: CompiledSql) -> Self {
        Self { pool, compiled }
    }

    #[must_use]
    pub fn compiled(&self) -> &CompiledSql {
        &self.compiled
    }

    fn facet_column(&self, field_name: &str) -> Result<String> {
        self.compiled
            .filter_columns
            .iter()
            .find(|(name, _)| name == field_name)
            .map(|(_, column)| column.clone())
            .ok_or_else(|| SearchError::FacetField {
                field_name: field_name.to_string(),
                model: self
                    .compiled
                    .model
                    .rsplit('.')
                    .next()
                    .unwrap_or(&self.compiled.model)
                    .to_string(),
            })
    }
}

/// Bucket key from its text form and SQLite storage class
fn facet_key(text: Option<String>, kind: &str) -> Option<Value> {
    let text = text?;
    match kind {
        "null" => None,
        "integer" => Some(text.parse::<i64>().map_or(Value::String(text), Value::from)),
        "real" => Some(text.parse::<f64>().map_or(Value::String(text), Value::from)),
        _ => Some(Value::String(text)),
    }
}

#[async_trait]
impl SearchExecutor for EmbeddedExecutor {
    fn backend(&self) -> &'static str {
        "embedded"
    }

    async fn fetch(&self, window: Window) -> Result<Vec<Hit>> {
        let limit = window.limit();
        if limit == Some(0) {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT e.object_id AS pk, {} AS score {} ORDER BY {} LIMIT ? OFFSET ?",
            self.compiled.score_expr(),
            self.compiled.from_where.clause,
            self.compiled.order_by
        );
        debug!(sql = %sql, start = window.start, limit = ?limit, "Embedded search");

        let rows = bind_params(sqlx::query(&sql), &self.compiled.from_where.params)
            .bind(limit.and_then(|l| i64::try_from(l).ok()).unwrap_or(-1))
            .bind(i64::try_from(window.start).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<Hit> {
                Ok(Hit {
                    pk: row.try_get("pk")?,
                    score: row.try_get("score")?,
                })
            })
            .collect()
    }

    async fn count(&self) -> Result<usize> {
        let _timer = metrics::LatencyTimer::new("embedded", "count");
        let sql = format!("SELECT COUNT(*) AS n {}", self.compiled.from_where.clause);
        let row = bind_params(sqlx::query(&sql), &self.compiled.from_where.params)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("n")?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn facet(&self, field_name: &str) -> Result<FacetCounts> {
        let column = super::translator::column_expr(&self.facet_column(field_name)?);
        let _timer = metrics::LatencyTimer::new("embedded", "facet");

        let sql = format!(
            "SELECT CAST({column} AS TEXT) AS value, typeof({column}) AS kind, COUNT(*) AS n {} \
             GROUP BY {column} ORDER BY n DESC, {column}",
            self.compiled.from_where.clause
        );
        debug!(sql = %sql, field = field_name, "Embedded facet");
        let rows = bind_params(sqlx::query(&sql), &self.compiled.from_where.params)
            .fetch_all(&self.pool)
            .await?;

        let mut buckets = Vec::with_capacity(rows.len() + 1);
        for row in &rows {
            let kind: String = row.try_get("kind")?;
            let count: i64 = row.try_get("n")?;
            buckets.push((
                facet_key(row.try_get("value")?, &kind),
                u64::try_from(count).unwrap_or_default(),
            ));
        }
        // Missing-value bucket is always reported
        if !buckets.iter().any(|(key, _)| key.is_none()) {
            buckets.push((None, 0));
        }
        Ok(buckets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_facet_key() {
        assert_eq!(facet_key(Some("A".into()), "text"), Some(json!("A")));
        assert_eq!(facet_key(Some("3".into()), "integer"), Some(json!(3)));
        assert_eq!(facet_key(Some("2.5".into()), "real"), Some(json!(2.5)));
        assert_eq!(facet_key(None, "null"), None);
    }
}
