//! A generic, transactional document CRUD engine.
//!
//! This crate is the core of the doccrud project and provides:
//!
//! - **Request filters** ([`filter`], [`find`]) - Typed, validated `op:value` filters and list queries
//! - **Query planning** ([`planner`], [`query`]) - Store-neutral predicates, sort and projection
//! - **Store backend abstraction** ([`backend`], [`blob`]) - Traits for document and blob stores
//! - **Transactions** ([`store`], [`transaction`], [`collection`]) - Atomic units of work with hooks
//! - **Entity capabilities** ([`capability`]) - Per-entity adapters for reads and mutations
//! - **Generic operations** ([`crud`]) - `get`, `fetch`, `create`, `update` and `delete` over adapters
//! - **Error handling** ([`error`]) - The error taxonomy and its status mapping
//!
//! # Example
//!
//! ```ignore
//! use doccrud::{crud, prelude::*};
//!
//! let ctx = Context::background().timeout(Duration::from_secs(5));
//! let query = FindQuery::parse(&params, &places.query_schema())?;
//! let page = crud::user_fetch_page(&places, &ctx, Some(&actor), query).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as doccrud_core;

pub mod actor;
pub mod auth;
pub mod backend;
pub mod blob;
pub mod capability;
pub mod collection;
pub mod config;
pub mod context;
pub mod crud;
pub mod document;
pub mod error;
pub mod filter;
pub mod find;
pub mod page;
pub mod patch;
pub mod pipeline;
pub mod planner;
pub mod query;
pub mod store;
pub mod transaction;
