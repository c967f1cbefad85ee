// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Embedded SQLite FTS5 backend.
//!
//! # Architecture
//!
//! ```text
//! EmbeddedBackend
//!   ├── EmbeddedCompiler ──▶ CompiledSql ──▶ EmbeddedExecutor
//!   ├── EmbeddedIndex (single shared index, ResetRebuilder)
//!   └── SqlitePool
//! ```
//!
//! Full-text matching runs over two FTS5 columns (`body`, `autocomplete`);
//! filters and ordering read the JSON document stored next to them.

pub mod compiler;
pub mod index;
pub mod results;
pub mod translator;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Sqlite;
use tracing::{debug, info};

pub use self::compiler::{CompiledSql, EmbeddedCompiler};
pub use self::index::EmbeddedIndex;
pub use self::results::EmbeddedExecutor;
pub use self::translator::{SqlParam, SqlQuery, SqliteDialect};

use crate::backends::compiler::CompileRequest;
use crate::backends::index::{IndexRebuilder, ResetRebuilder, SearchIndex};
use crate::backends::results::SearchExecutor;
use crate::backends::BackendAdapter;
use crate::config::BackendConfig;
use crate::error::{Result, SearchError};
use crate::index::ModelRegistry;
use crate::query::Operator;

/// Bind `params` in order
pub(crate) fn bind_params<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[SqlParam],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlParam::Text(s) => query.bind(s.clone()),
            SqlParam::Integer(n) => query.bind(*n),
            SqlParam::Numeric(n) => query.bind(*n),
            SqlParam::Boolean(b) => query.bind(*b),
        };
    }
    query
}

/// Open a pool for `url`. In-memory databases live as long as their single
/// connection, so that connection is never recycled.
pub async fn connect_pool(url: &str) -> Result<SqlitePool> {
    let in_memory = url.contains(":memory:") || url.contains("mode=memory");
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

    let pool = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .connect_with(options.journal_mode(SqliteJournalMode::Wal))
            .await?
    };
    debug!(url, in_memory, "SQLite pool connected");
    Ok(pool)
}

pub struct EmbeddedBackend {
    pool: SqlitePool,
    registry: Arc<ModelRegistry>,
    index: Arc<EmbeddedIndex>,
}

impl EmbeddedBackend {
    /// Backend over an existing pool. The schema is created by `connect` or
    /// the first `put()`.
    pub fn new(pool: SqlitePool, registry: Arc<ModelRegistry>, index_name: impl Into<String>) -> Self {
        let index = Arc::new(EmbeddedIndex::new(index_name, pool.clone(), registry.clone()));
        Self { pool, registry, index }
    }

    pub async fn connect(url: &str, registry: Arc<ModelRegistry>, index_name: impl Into<String>) -> Result<Self> {
        let pool = connect_pool(url).await?;
        index::ensure_schema(&pool).await?;
        let backend = Self::new(pool, registry, index_name);
        info!(url, index = %backend.index.name(), "Embedded search backend ready");
        Ok(backend)
    }

    pub async fn from_config(config: &BackendConfig, registry: Arc<ModelRegistry>) -> Result<Self> {
        Self::connect(&config.url, registry, config.index_name()).await
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[must_use]
    pub fn index(&self) -> &Arc<EmbeddedIndex> {
        &self.index
    }
}

impl BackendAdapter for EmbeddedBackend {
    fn kind(&self) -> &'static str {
        "embedded"
    }

    fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    fn default_operator(&self) -> Operator {
        Operator::And
    }

    fn compile(&self, request: &CompileRequest) -> Result<Arc<dyn SearchExecutor>> {
        let compiler = EmbeddedCompiler::new(&self.registry, request, self.index.name())?;
        compiler.check()?;
        let compiled = compiler.compile()?;
        debug!(
            where_clause = %compiled.from_where.inline(),
            order_by = %compiled.order_by,
            "Compiled embedded query"
        );
        Ok(Arc::new(EmbeddedExecutor::new(self.pool.clone(), compiled)))
    }

    fn index_for_model(&self, model: &str) -> Result<Arc<dyn SearchIndex>> {
        if self.registry.get(model).is_none() {
            return Err(SearchError::Configuration(format!("model {model} is not registered")));
        }
        Ok(self.index.clone())
    }

    fn all_indexes(&self) -> Vec<Arc<dyn SearchIndex>> {
        vec![self.index.clone()]
    }

    fn rebuilder(&self, model: &str) -> Result<Box<dyn IndexRebuilder>> {
        Ok(Box::new(ResetRebuilder::new(self.index_for_model(model)?)))
    }
}
