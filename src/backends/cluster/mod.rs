// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote inverted-index cluster backend (Elasticsearch/OpenSearch JSON DSL).
//!
//! # Architecture
//!
//! ```text
//! ClusterBackend
//!   ├── ClusterCompiler ──▶ CompiledQuery ──▶ ClusterExecutor ──┐
//!   ├── ClusterIndex (one per root model, cached)               │
//!   ├── ResetRebuilder / AtomicRebuilder                        │
//!   └── Arc<dyn ClusterTransport> ◀─────────────────────────────┘
//!          ├── HttpTransport   (reqwest, round-robin hosts)
//!          └── InMemoryCluster (process-local)
//! ```
//!
//! Every model shares the index of its root model:
//! `<base>__<app_label>_<root_name>`, lowercased.

pub mod compiler;
pub mod http;
pub mod index;
pub mod memory;
pub mod rebuilder;
pub mod results;
pub mod transport;

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::debug;

pub use self::compiler::{ClusterCompiler, CompiledQuery};
pub use self::http::HttpTransport;
pub use self::index::ClusterIndex;
pub use self::memory::InMemoryCluster;
pub use self::rebuilder::AtomicRebuilder;
pub use self::results::ClusterExecutor;
pub use self::transport::{AliasAction, BulkAction, ClusterTransport, TransportError};

use crate::backends::compiler::CompileRequest;
use crate::backends::index::{IndexRebuilder, ResetRebuilder, SearchIndex};
use crate::backends::results::SearchExecutor;
use crate::backends::BackendAdapter;
use crate::config::BackendConfig;
use crate::error::{Result, SearchError};
use crate::index::ModelRegistry;
use crate::query::Operator;

/// Analysis settings every index is created with
#[must_use]
pub fn default_settings() -> Value {
    json!({
        "settings": {
            "analysis": {
                "analyzer": {
                    "ngram_analyzer": {
                        "type": "custom",
                        "tokenizer": "standard",
                        "filter": ["asciifolding", "lowercase", "ngram"]
                    },
                    "edgengram_analyzer": {
                        "type": "custom",
                        "tokenizer": "standard",
                        "filter": ["asciifolding", "lowercase", "edgengram"]
                    }
                },
                "tokenizer": {
                    "ngram_tokenizer": {"type": "ngram", "min_gram": 3, "max_gram": 15},
                    "edgengram_tokenizer": {"type": "edge_ngram", "min_gram": 2, "max_gram": 15, "side": "front"}
                },
                "filter": {
                    "ngram": {"type": "ngram", "min_gram": 3, "max_gram": 15},
                    "edgengram": {"type": "edge_ngram", "min_gram": 1, "max_gram": 15}
                }
            },
            "index": {"max_ngram_diff": 12}
        }
    })
}

/// Recursively merge `overrides` into `base`. Objects merge key by key; any
/// other value replaces what was there.
pub fn deep_merge(base: &mut Value, overrides: &Value) {
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overrides) => *base = overrides.clone(),
    }
}

pub struct ClusterBackend {
    transport: Arc<dyn ClusterTransport>,
    registry: Arc<ModelRegistry>,
    index_name: String,
    settings: Arc<Value>,
    atomic_rebuild: bool,
    indexes: DashMap<String, Arc<ClusterIndex>>,
}

impl ClusterBackend {
    pub fn new(transport: Arc<dyn ClusterTransport>, registry: Arc<ModelRegistry>, index_name: impl Into<String>) -> Self {
        Self {
            transport,
            registry,
            index_name: index_name.into(),
            settings: Arc::new(default_settings()),
            atomic_rebuild: false,
            indexes: DashMap::new(),
        }
    }

    /// Merge `overrides` into the default index settings
    #[must_use]
    pub fn with_settings(mut self, overrides: &Value) -> Self {
        let mut settings = default_settings();
        deep_merge(&mut settings, overrides);
        self.settings = Arc::new(settings);
        self.indexes.clear();
        self
    }

    #[must_use]
    pub fn with_atomic_rebuild(mut self, atomic_rebuild: bool) -> Self {
        self.atomic_rebuild = atomic_rebuild;
        self
    }

    /// Backend over HTTP as described by `config`
    pub fn from_config(config: &BackendConfig, registry: Arc<ModelRegistry>) -> Result<Self> {
        let transport = HttpTransport::new(&config.urls, config.timeout())?;
        debug!(hosts = ?transport.hosts(), index = config.index_name(), "Cluster backend configured");
        let mut backend = Self::new(Arc::new(transport), registry, config.index_name())
            .with_atomic_rebuild(config.atomic_rebuild);
        if let Some(overrides) = &config.index_settings {
            backend = backend.with_settings(overrides);
        }
        Ok(backend)
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn ClusterTransport> {
        &self.transport
    }

    #[must_use]
    pub fn settings(&self) -> &Value {
        &self.settings
    }

    /// Index name shared by `model` and the rest of its hierarchy
    pub fn index_name_for_model(&self, model: &str) -> Result<String> {
        let root = self
            .registry
            .root_of(model)
            .ok_or_else(|| SearchError::Configuration(format!("model {model} is not registered")))?;
        Ok(format!(
            "{}__{}_{}",
            self.index_name,
            root.app_label.to_lowercase(),
            root.name.to_lowercase()
        ))
    }

    /// Cached handle on the index of `model`
    pub fn cluster_index(&self, model: &str) -> Result<Arc<ClusterIndex>> {
        let name = self.index_name_for_model(model)?;
        let index = self.indexes.entry(name.clone()).or_insert_with(|| {
            Arc::new(ClusterIndex::new(
                name,
                self.transport.clone(),
                self.registry.clone(),
                self.settings.clone(),
            ))
        });
        Ok(index.clone())
    }
}

impl BackendAdapter for ClusterBackend {
    fn kind(&self) -> &'static str {
        "cluster"
    }

    fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    fn default_operator(&self) -> Operator {
        Operator::Or
    }

    fn compile(&self, request: &CompileRequest) -> Result<Arc<dyn SearchExecutor>> {
        let compiler = ClusterCompiler::new(&self.registry, request)?;
        compiler.check()?;
        let compiled = compiler.compile()?;
        let index = self.index_name_for_model(&request.model)?;
        debug!(index = %index, query = %compiled.query, sort = ?compiled.sort, "Compiled cluster query");
        Ok(Arc::new(ClusterExecutor::new(self.transport.clone(), index, compiled)))
    }

    fn index_for_model(&self, model: &str) -> Result<Arc<dyn SearchIndex>> {
        Ok(self.cluster_index(model)?)
    }

    fn all_indexes(&self) -> Vec<Arc<dyn SearchIndex>> {
        let mut seen: Vec<Arc<dyn SearchIndex>> = Vec::new();
        for model in self.registry.indexed_models() {
            let Ok(index) = self.cluster_index(&model.label()) else {
                continue;
            };
            if !seen.iter().any(|known| known.name() == index.name()) {
                seen.push(index);
            }
        }
        seen
    }

    fn rebuilder(&self, model: &str) -> Result<Box<dyn IndexRebuilder>> {
        let index = self.cluster_index(model)?;
        if self.atomic_rebuild {
            Ok(Box::new(AtomicRebuilder::new(index.as_ref().clone())))
        } else {
            Ok(Box::new(ResetRebuilder::new(index)))
        }
    }
}
