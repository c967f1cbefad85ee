// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Zero-downtime rebuild through an alias swap.
//!
//! ```text
//! start():   create  search__app_book_k3x9q2a
//! finish():  refresh search__app_book_k3x9q2a
//!            search__app_book is an alias?
//!              yes → one update: remove old targets, add new target
//!                    delete old targets
//!              no  → delete plain index search__app_book (if any)
//!                    alias search__app_book → search__app_book_k3x9q2a
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::info;

use super::index::ClusterIndex;
use super::transport::AliasAction;
use crate::backends::index::{IndexRebuilder, SearchIndex};
use crate::error::Result;
use crate::metrics;

const SUFFIX_LEN: usize = 7;

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

pub struct AtomicRebuilder {
    alias: ClusterIndex,
    index: Arc<ClusterIndex>,
}

impl AtomicRebuilder {
    /// Rebuilder for the live name `alias`. The new generation gets a fresh
    /// random suffix.
    pub fn new(alias: ClusterIndex) -> Self {
        let name = format!("{}_{}", alias.name(), random_suffix());
        let index = Arc::new(alias.sibling(name));
        Self { alias, index }
    }

    /// Name of the generation being built
    #[must_use]
    pub fn new_index_name(&self) -> &str {
        self.index.name()
    }

    async fn swap_alias(&self, old: Vec<ClusterIndex>) -> Result<()> {
        let alias_name = self.alias.name().to_string();
        let mut actions: Vec<AliasAction> = old
            .iter()
            .map(|index| AliasAction::Remove {
                index: index.name().to_string(),
                alias: alias_name.clone(),
            })
            .collect();
        actions.push(AliasAction::Add {
            index: self.index.name().to_string(),
            alias: alias_name.clone(),
        });

        let outcome = self.alias.transport().update_aliases(&actions).await;
        metrics::record_index_operation("cluster", "alias", outcome.is_ok());
        outcome?;
        info!(alias = %alias_name, index = %self.index.name(), "Alias swapped");

        for index in old {
            if index.name() != self.index.name() {
                index.delete().await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl IndexRebuilder for AtomicRebuilder {
    async fn start(&mut self) -> Result<Arc<dyn SearchIndex>> {
        info!(alias = %self.alias.name(), index = %self.index.name(), "Starting atomic rebuild");
        self.index.put().await?;
        Ok(self.index.clone())
    }

    async fn finish(&mut self) -> Result<()> {
        self.index.refresh().await?;

        if self.alias.is_alias().await? {
            let old = self.alias.aliased_indices().await?;
            self.swap_alias(old).await?;
        } else {
            // First atomic run: a plain index may still hold the name
            self.alias.delete().await?;
            self.index.put_alias(self.alias.name()).await?;
        }

        info!(alias = %self.alias.name(), index = %self.index.name(), "Atomic rebuild finished");
        Ok(())
    }
}
