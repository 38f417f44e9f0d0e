//! Main doccrud crate providing a transactional CRUD engine over document stores.
//!
//! This crate is the primary entry point for users of doccrud. It re-exports the engine from
//! `doccrud-core`, provides the storage backends and ships the `users` and `places` entity
//! adapters.
//!
//! # Features
//!
//! - **Validated listings** - `op:value` request filters, sorting, field selection and pagination
//! - **Ownership** - Every operation has an actor-aware variant with admin-or-owner checks
//! - **Transactional mutations** - Entity hooks keep cross-collection references consistent
//! - **Multiple backends** - In-memory storage for tests, MongoDB behind the `mongodb` feature
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use doccrud::{
//!     entities::{Location, PlaceAdapter, PlacePost},
//!     memory::{InMemoryBlobStore, InMemoryStore},
//!     prelude::*,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = DocumentStore::new(
//!         Arc::new(InMemoryStore::builder().build().await?),
//!         Arc::new(InMemoryBlobStore::new("images")),
//!         EngineConfig::from_env(),
//!     );
//!     let places = PlaceAdapter::new(store.clone());
//!     let ctx = Context::background();
//!
//!     let place = crud::user_create(&places, &ctx, Some(&actor), PlacePost {
//!         title: "Empire State Building".into(),
//!         description: "One of the most famous sky scrapers in the world".into(),
//!         address: "20 W 34th St, New York, NY 10001".into(),
//!         location: Location { lat: 40.7484405, lng: -73.9878584 },
//!         creator_id: actor.id.to_hex(),
//!         image: None,
//!     })
//!     .await?;
//!
//!     let params = [("title", "text:Empire"), ("sort", "-createdAt")];
//!     let query = FindQuery::parse(params, &places.query_schema())?;
//!     let page = crud::user_fetch_page(&places, &ctx, Some(&actor), query).await?;
//!
//!     store.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - `mongodb` - MongoDB backend (requires the `mongodb` feature)

pub mod entities;
pub mod prelude;

pub use doccrud_core::{
    actor, auth, backend, blob, capability, collection, config, context, crud, document, error, filter, find, page,
    patch, pipeline, planner, query, store, transaction,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use doccrud_memory::{InMemoryBlobStore, InMemoryStore, InMemoryStoreBuilder, MemorySession};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use doccrud_mongodb::{MongoDbStore, MongoDbStoreBuilder, MongoSession};
}
