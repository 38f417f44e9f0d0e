//! The engine's handle on its injected clients.
//!
//! A [`DocumentStore`] is built once by the composition root from a backend, a blob store and
//! an [`EngineConfig`], then cloned into every entity adapter. Clones share the same clients.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use doccrud::{prelude::*, memory::{InMemoryStore, InMemoryBlobStore}};
//!
//! let store = DocumentStore::new(
//!     Arc::new(InMemoryStore::builder().build().await?),
//!     Arc::new(InMemoryBlobStore::new("uploads")),
//!     EngineConfig::from_env(),
//! );
//! store.ensure_indexes(&UserAdapter::indexes()).await?;
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::{
    backend::{IndexSpec, StoreBackend},
    blob::BlobStore,
    config::EngineConfig,
    context::Context,
    error::CrudResult,
    planner::QueryPlanner,
    transaction::Transaction,
};

#[derive(Debug, Clone)]
pub struct DocumentStore {
    backend: Arc<dyn StoreBackend>,
    blobs: Arc<dyn BlobStore>,
    config: Arc<EngineConfig>,
}

impl DocumentStore {
    pub fn new(backend: Arc<dyn StoreBackend>, blobs: Arc<dyn BlobStore>, config: EngineConfig) -> Self {
        Self { backend, blobs, config: Arc::new(config) }
    }

    pub fn backend(&self) -> &dyn StoreBackend {
        self.backend.as_ref()
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A planner bound to this store's page size limit.
    pub fn planner(&self) -> QueryPlanner {
        QueryPlanner::new(self.config.max_page_size)
    }

    /// Starts a session and opens a transaction on it.
    ///
    /// # Errors
    ///
    /// Returns the context's error when it is already cancelled or expired, or the backend's
    /// error when the session cannot be started.
    pub async fn begin<'c>(&self, ctx: &'c Context) -> CrudResult<Transaction<'c>> {
        Transaction::begin(self.backend(), ctx).await
    }

    /// Declares every index in `indexes`.
    pub async fn ensure_indexes(&self, indexes: &[IndexSpec]) -> CrudResult<()> {
        for index in indexes {
            debug!(collection = %index.collection, fields = ?index.fields, kind = ?index.kind, "ensuring index");

            self.backend.add_index(&index.collection, &index.fields, index.kind).await?;
        }

        Ok(())
    }

    pub async fn shutdown(&self) -> CrudResult<()> {
        self.backend.shutdown().await
    }
}
