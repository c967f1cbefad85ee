// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Index handles and rebuilders shared by every backend.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::index::Indexable;

/// A named index of one backend.
///
/// Writes for models that declare no search fields are no-ops.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Create the index with the backend's settings
    async fn put(&self) -> Result<()>;

    /// Drop the index. A missing index is not an error.
    async fn delete(&self) -> Result<()>;

    /// Make recent writes visible to searches
    async fn refresh(&self) -> Result<()>;

    async fn reset(&self) -> Result<()> {
        self.delete().await?;
        self.put().await
    }

    /// Register the schema of `model` with the index
    async fn add_model(&self, model: &str) -> Result<()>;

    /// Upsert one object
    async fn add_item(&self, item: &dyn Indexable) -> Result<()>;

    /// Upsert many objects of `model` in one request
    async fn add_items(&self, model: &str, items: &[&dyn Indexable]) -> Result<()>;

    /// Remove one object. A missing document is not an error.
    async fn delete_item(&self, item: &dyn Indexable) -> Result<()>;
}

/// Two-phase index rebuild: `start` hands out the index to fill, `finish`
/// makes it live.
#[async_trait]
pub trait IndexRebuilder: Send {
    async fn start(&mut self) -> Result<Arc<dyn SearchIndex>>;

    async fn finish(&mut self) -> Result<()>;
}

/// Rebuild in place: reset on start, refresh on finish. Searches see a
/// partially filled index until the rebuild completes.
pub struct ResetRebuilder {
    index: Arc<dyn SearchIndex>,
}

impl ResetRebuilder {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl IndexRebuilder for ResetRebuilder {
    async fn start(&mut self) -> Result<Arc<dyn SearchIndex>> {
        info!(index = %self.index.name(), "Resetting index for rebuild");
        self.index.reset().await?;
        Ok(self.index.clone())
    }

    async fn finish(&mut self) -> Result<()> {
        self.index.refresh().await?;
        info!(index = %self.index.name(), "Index rebuild finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl SearchIndex for Recording {
        fn name(&self) -> &str {
            "recording"
        }
        async fn put(&self) -> Result<()> {
            self.calls.lock().push("put");
            Ok(())
        }
        async fn delete(&self) -> Result<()> {
            self.calls.lock().push("delete");
            Ok(())
        }
        async fn refresh(&self) -> Result<()> {
            self.calls.lock().push("refresh");
            Ok(())
        }
        async fn add_model(&self, _model: &str) -> Result<()> {
            Ok(())
        }
        async fn add_item(&self, _item: &dyn Indexable) -> Result<()> {
            Ok(())
        }
        async fn add_items(&self, _model: &str, _items: &[&dyn Indexable]) -> Result<()> {
            Ok(())
        }
        async fn delete_item(&self, _item: &dyn Indexable) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reset_rebuilder_sequence() {
        let index = Arc::new(Recording::default());
        let mut rebuilder = ResetRebuilder::new(index.clone());
        let handed_out = rebuilder.start().await.unwrap();
        assert_eq!(handed_out.name(), "recording");
        rebuilder.finish().await.unwrap();
        assert_eq!(*index.calls.lock(), vec!["delete", "put", "refresh"]);
    }
}
