// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Process-wide named backends.
//!
//! Backends are built once by [`init`] and shared as `Arc`s until
//! [`shutdown`]. Lookups take a read lock only.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::info;

use crate::backends::SearchBackend;
use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::index::ModelRegistry;

/// Alias looked up when none is given
pub const DEFAULT_ALIAS: &str = "default";

static BACKENDS: Lazy<RwLock<HashMap<String, Arc<SearchBackend>>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Build every configured backend and register it under its alias.
///
/// All backends are built before any is registered, so a failing entry leaves
/// the registry untouched. Aliases already registered are replaced.
pub async fn init(config: &SearchConfig, registry: Arc<ModelRegistry>) -> Result<()> {
    let mut built = Vec::with_capacity(config.backends.len());
    for (alias, backend_config) in &config.backends {
        let backend = SearchBackend::from_config(alias, backend_config, registry.clone()).await?;
        built.push((alias.clone(), Arc::new(backend)));
    }

    let mut backends = BACKENDS.write();
    for (alias, backend) in built {
        backends.insert(alias, backend);
    }
    info!(count = backends.len(), "Search backends registered");
    Ok(())
}

/// Register an already-built backend under its alias
pub fn register(backend: SearchBackend) -> Arc<SearchBackend> {
    let backend = Arc::new(backend);
    BACKENDS
        .write()
        .insert(backend.alias().to_string(), backend.clone());
    backend
}

/// Backend registered as `alias` (or [`DEFAULT_ALIAS`])
pub fn get_search_backend(alias: Option<&str>) -> Result<Arc<SearchBackend>> {
    let alias = alias.unwrap_or(DEFAULT_ALIAS);
    BACKENDS
        .read()
        .get(alias)
        .cloned()
        .ok_or_else(|| SearchError::Configuration(format!("Could not find backend '{alias}'")))
}

/// Every registered backend, ordered by alias
#[must_use]
pub fn all_backends() -> Vec<Arc<SearchBackend>> {
    let backends = BACKENDS.read();
    let mut all: Vec<_> = backends.values().cloned().collect();
    all.sort_by(|a, b| a.alias().cmp(b.alias()));
    all
}

/// Drop every registered backend
pub fn shutdown() {
    let mut backends = BACKENDS.write();
    let count = backends.len();
    backends.clear();
    info!(count, "Search backends released");
}
