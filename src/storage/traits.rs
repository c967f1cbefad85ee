// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Object-store collaborator.
//!
//! The store is the source of truth for domain objects. The search layer only
//! reads from it: result sets hand it the primary keys returned by a backend and
//! get back whatever objects still exist.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Model not found in object store: {0}")]
    UnknownModel(String),
    #[error("Object store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait ObjectStore<T>: Send + Sync {
    /// Fetch the objects of `model` (or any of its subtypes) whose primary key is in `pks`.
    ///
    /// Order is not guaranteed and missing keys are simply absent from the output.
    async fn fetch_by_pks(&self, model: &str, pks: &[String]) -> Result<Vec<T>, StoreError>;

    /// All objects of `model` and its subtypes. Used to repopulate an index.
    async fn all(&self, model: &str) -> Result<Vec<T>, StoreError>;
}
