//! MongoDB backend implementation for doccrud.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait, with
//! multi-document transactions through client sessions.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! doccrud = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Transactions** - Every engine mutation runs in a client-session transaction; this
//!   requires a replica set or sharded cluster
//! - **Full query support** - Leverages MongoDB's query engine for filtering and sorting, with
//!   an English, case-insensitive collation
//! - **Indexing** - Unique and text indexes; duplicate keys surface as conflicts
//!
//! # Example
//!
//! ```ignore
//! use doccrud::{backend::StoreBackendBuilder, config::EngineConfig, mongodb::MongoDbStore};
//!
//! let config = EngineConfig::from_env();
//! let store = MongoDbStore::builder("mongodb://localhost:27017/?replicaSet=rs0", "places")
//!     .text_search_language(config.text_search_language.clone())
//!     .build()
//!     .await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as doccrud_mongodb;

pub mod query;
pub mod store;

pub use store::{MongoDbStore, MongoDbStoreBuilder, MongoSession};
