// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Execution of compiled cluster queries.
//!
//! Windows of at most [`PAGE_SIZE`] hits are fetched with `from`/`size`.
//! Larger or unbounded windows walk a scroll cursor, skipping the first
//! `start` hits by hand, and always release the cursor afterwards.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::compiler::CompiledQuery;
use super::transport::{ClusterTransport, TransportError};
use crate::backends::results::{FacetCounts, Hit, SearchExecutor, Window};
use crate::error::{Result, SearchError};
use crate::metrics;

pub const PAGE_SIZE: usize = 100;
pub const SCROLL_KEEP_ALIVE: &str = "2m";

pub struct ClusterExecutor {
    transport: Arc<dyn ClusterTransport>,
    index: String,
    compiled: CompiledQuery,
}

impl ClusterExecutor {
    pub fn new(transport: Arc<dyn ClusterTransport>, index: impl Into<String>, compiled: CompiledQuery) -> Self {
        Self {
            transport,
            index: index.into(),
            compiled,
        }
    }

    #[must_use]
    pub fn compiled(&self) -> &CompiledQuery {
        &self.compiled
    }

    fn body(&self, with_sort: bool) -> Value {
        let mut body = json!({ "query": self.compiled.query });
        if with_sort {
            if let Some(sort) = &self.compiled.sort {
                body["sort"] = sort.clone();
            }
        }
        body
    }

    fn search_body(&self) -> Value {
        let mut body = self.body(true);
        body["_source"] = json!(false);
        body["stored_fields"] = json!("pk");
        body
    }

    async fn scroll_hits(&self, window: Window, scroll_id: &mut Option<String>) -> Result<Vec<Hit>> {
        let mut body = self.search_body();
        body["size"] = json!(PAGE_SIZE);

        let mut skip = window.start;
        let mut remaining = window.limit();
        let mut out = Vec::new();

        let mut page = self
            .transport
            .search(&self.index, &body, Some(SCROLL_KEEP_ALIVE))
            .await?;
        loop {
            if let Some(id) = page.get("_scroll_id").and_then(Value::as_str) {
                *scroll_id = Some(id.to_string());
            }
            let hits = hits_from_page(&page)?;
            if hits.is_empty() {
                break;
            }

            if skip >= hits.len() {
                skip -= hits.len();
            } else {
                for hit in hits.into_iter().skip(skip) {
                    if remaining == Some(0) {
                        break;
                    }
                    out.push(hit);
                    if let Some(left) = remaining.as_mut() {
                        *left -= 1;
                    }
                }
                skip = 0;
                if remaining == Some(0) {
                    break;
                }
            }

            let Some(id) = scroll_id.clone() else {
                break;
            };
            page = self.transport.scroll(&id, SCROLL_KEEP_ALIVE).await?;
        }
        Ok(out)
    }
}

fn pk_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Hits of one response page, read from the stored `pk` field
fn hits_from_page(page: &Value) -> Result<Vec<Hit>> {
    let hits = page
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .ok_or_else(|| TransportError::Decode("response has no hits".to_string()))?;

    hits.iter()
        .map(|hit| -> Result<Hit> {
            let pk = hit
                .pointer("/fields/pk/0")
                .and_then(pk_string)
                .ok_or_else(|| TransportError::Decode(format!("hit without stored pk: {hit}")))?;
            Ok(Hit {
                pk,
                score: hit.get("_score").and_then(Value::as_f64),
            })
        })
        .collect()
}

#[async_trait]
impl SearchExecutor for ClusterExecutor {
    fn backend(&self) -> &'static str {
        "cluster"
    }

    async fn fetch(&self, window: Window) -> Result<Vec<Hit>> {
        let limit = window.limit();
        if limit == Some(0) {
            return Ok(Vec::new());
        }

        if limit.is_some_and(|limit| limit <= PAGE_SIZE) {
            let mut body = self.search_body();
            body["from"] = json!(window.start);
            body["size"] = json!(limit.unwrap_or(PAGE_SIZE));
            debug!(index = %self.index, body = %body, "Cluster search");
            let page = self.transport.search(&self.index, &body, None).await?;
            return hits_from_page(&page);
        }

        debug!(index = %self.index, query = %self.compiled.query, start = window.start, "Cluster scroll search");
        let mut scroll_id = None;
        let outcome = self.scroll_hits(window, &mut scroll_id).await;
        if let Some(id) = scroll_id {
            if let Err(e) = self.transport.clear_scroll(&id).await {
                warn!(index = %self.index, scroll_id = %id, error = %e, "Failed to clear scroll cursor");
            }
        }
        outcome
    }

    async fn count(&self) -> Result<usize> {
        let _timer = metrics::LatencyTimer::new("cluster", "count");
        let count = self.transport.count(&self.index, &self.body(false)).await?;
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }

    async fn facet(&self, field_name: &str) -> Result<FacetCounts> {
        let column = self
            .compiled
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
            })?;

        let _timer = metrics::LatencyTimer::new("cluster", "facet");
        let mut body = self.body(true);
        body["size"] = json!(0);
        body["aggregations"] = json!({ field_name: {"terms": {"field": column, "missing": 0}} });
        debug!(index = %self.index, field = field_name, "Cluster facet");

        let response = self.transport.search(&self.index, &body, None).await?;
        let buckets = response
            .pointer(&format!("/aggregations/{field_name}/buckets"))
            .and_then(Value::as_array)
            .ok_or_else(|| TransportError::Decode(format!("response has no buckets for {field_name}")))?;

        Ok(buckets
            .iter()
            .map(|bucket| {
                let key = bucket.get("key").cloned().unwrap_or(Value::Null);
                // Integer zero is the missing-value bucket
                let key = if key == json!(0) { None } else { Some(key) };
                (key, bucket.get("doc_count").and_then(Value::as_u64).unwrap_or(0))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::cluster::memory::InMemoryCluster;
    use crate::backends::cluster::transport::BulkAction;

    async fn cluster_with(n: usize) -> Arc<InMemoryCluster> {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.create_index("idx", &json!({})).await.unwrap();
        let actions: Vec<BulkAction> = (1..=n)
            .map(|i| BulkAction {
                id: i.to_string(),
                document: json!({"pk": i.to_string(), "rank_filter": i, "genre_filter": if i % 2 == 0 { "even" } else { "odd" }}),
            })
            .collect();
        cluster.bulk("idx", &actions).await.unwrap();
        cluster
    }

    fn executor(cluster: Arc<InMemoryCluster>) -> ClusterExecutor {
        ClusterExecutor::new(
            cluster,
            "idx",
            CompiledQuery {
                model: "tests.Item".into(),
                query: json!({"match_all": {}}),
                sort: Some(json!([{"rank_filter": "asc"}])),
                filter_columns: vec![("genre".into(), "genre_filter".into())],
            },
        )
    }

    fn pks(hits: &[Hit]) -> Vec<usize> {
        hits.iter().map(|hit| hit.pk.parse().unwrap()).collect()
    }

    #[tokio::test]
    async fn test_small_window_uses_from_size() {
        let cluster = cluster_with(20).await;
        let exec = executor(cluster.clone());
        let hits = exec.fetch(Window { start: 5, stop: Some(8) }).await.unwrap();
        assert_eq!(pks(&hits), vec![6, 7, 8]);
        assert!(!cluster.requests().iter().any(|r| r.starts_with("scroll")));
    }

    #[tokio::test]
    async fn test_unbounded_window_scrolls_and_clears() {
        let cluster = cluster_with(250).await;
        let exec = executor(cluster.clone());
        let hits = exec.fetch(Window { start: 120, stop: None }).await.unwrap();
        assert_eq!(hits.len(), 130);
        assert_eq!(hits[0].pk, "121");
        assert_eq!(cluster.open_scrolls(), 0);
        assert!(cluster.requests().iter().any(|r| r.starts_with("clear_scroll")));
    }

    #[tokio::test]
    async fn test_large_window_stops_at_limit() {
        let cluster = cluster_with(250).await;
        let exec = executor(cluster.clone());
        let hits = exec.fetch(Window { start: 10, stop: Some(160) }).await.unwrap();
        assert_eq!(pks(&hits), (11..=160).collect::<Vec<_>>());
        assert_eq!(cluster.open_scrolls(), 0);
    }

    #[tokio::test]
    async fn test_empty_window_makes_no_request() {
        let cluster = cluster_with(3).await;
        cluster.clear_requests();
        let exec = executor(cluster.clone());
        assert!(exec.fetch(Window { start: 2, stop: Some(2) }).await.unwrap().is_empty());
        assert!(cluster.requests().is_empty());
    }

    #[tokio::test]
    async fn test_count_and_facet() {
        let cluster = cluster_with(5).await;
        let exec = executor(cluster);
        assert_eq!(exec.count().await.unwrap(), 5);
        assert_eq!(
            exec.facet("genre").await.unwrap(),
            vec![(Some(json!("odd")), 3), (Some(json!("even")), 2), (None, 0)]
        );

        let err = exec.facet("colour").await.unwrap_err();
        assert!(matches!(err, SearchError::FacetField { .. }));
        assert!(err.to_string().contains("Item"));
    }
}
