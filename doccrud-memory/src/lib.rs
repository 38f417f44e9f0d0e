//! In-memory backends for doccrud.
//!
//! This crate provides thread-safe, in-memory implementations of the `StoreBackend` and
//! `BlobStore` traits. They use async-aware read-write locks and are meant for development and
//! testing.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Transactions** - Snapshot sessions with atomic commit and write-conflict detection
//! - **Full query support** - Filtering, case-insensitive sorting, pagination and projection
//! - **Indexes** - Unique constraints and multi-field text search
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use doccrud::{prelude::*, memory::{InMemoryBlobStore, InMemoryStore}};
//!
//! let store = DocumentStore::new(
//!     Arc::new(InMemoryStore::builder().build().await?),
//!     Arc::new(InMemoryBlobStore::new("uploads")),
//!     EngineConfig::default(),
//! );
//! ```

#[allow(unused_extern_crates)]
extern crate self as doccrud_memory;

pub mod blob;
pub mod evaluator;
pub mod store;

pub use blob::InMemoryBlobStore;
pub use store::{InMemoryStore, InMemoryStoreBuilder, MemorySession};
