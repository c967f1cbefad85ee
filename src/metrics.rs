// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for search-bridge.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding application chooses the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `search_bridge_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `backend`: cluster, embedded
//! - `kind`: search, autocomplete, fetch, count, facet
//! - `operation`: create, delete, refresh, mapping, index, bulk, alias
//! - `status`: success, error, empty

use metrics::{counter, histogram};
use std::time::{Duration, Instant};

/// Record a search or autocomplete call at the facade
pub fn record_search_query(backend: &str, kind: &str, status: &str) {
    counter!(
        "search_bridge_queries_total",
        "backend" => backend.to_string(),
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record backend round-trip latency
pub fn record_search_latency(backend: &str, kind: &str, duration: Duration) {
    histogram!(
        "search_bridge_query_seconds",
        "backend" => backend.to_string(),
        "kind" => kind.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record number of hydrated results
pub fn record_search_results(count: usize) {
    histogram!("search_bridge_results").record(count as f64);
}

/// Record index maintenance
pub fn record_index_operation(backend: &str, operation: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(
        "search_bridge_index_operations_total",
        "backend" => backend.to_string(),
        "operation" => operation.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record documents sent in one bulk request
pub fn record_bulk_size(backend: &str, count: usize) {
    histogram!(
        "search_bridge_bulk_size",
        "backend" => backend.to_string()
    )
    .record(count as f64);
}

/// Record a swallowed failure in the object lifecycle helpers
pub fn record_lifecycle_error(backend: &str, operation: &str) {
    counter!(
        "search_bridge_lifecycle_errors_total",
        "backend" => backend.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    backend: &'static str,
    kind: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(backend: &'static str, kind: &'static str) -> Self {
        Self {
            backend,
            kind,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_search_latency(self.backend, self.kind, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // No recorder is installed; these check the calls don't panic.

    #[test]
    fn test_query_metrics() {
        record_search_query("cluster", "search", "success");
        record_search_query("embedded", "autocomplete", "error");
        record_search_query("cluster", "search", "empty");
        record_search_latency("cluster", "fetch", Duration::from_millis(3));
        record_search_results(42);
        record_search_results(0);
    }

    #[test]
    fn test_index_metrics() {
        record_index_operation("cluster", "create", true);
        record_index_operation("embedded", "bulk", false);
        record_bulk_size("cluster", 250);
        record_lifecycle_error("cluster", "add");
    }

    #[test]
    fn test_latency_timer() {
        {
            let _timer = LatencyTimer::new("embedded", "count");
            std::thread::sleep(Duration::from_micros(10));
        }
    }
}
