//! Convenient re-exports of commonly used types from doccrud.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use doccrud::prelude::*;
//! ```
//!
//! This provides access to:
//! - The store, its configuration and request contexts
//! - Capability traits and the generic operations in `crud`
//! - Request filters, list queries and pages
//! - Error types

pub use doccrud_core::{
    actor::Actor,
    backend::{IndexKind, IndexSpec, StoreBackend, StoreBackendBuilder, StoreSession},
    blob::BlobStore,
    capability::{DocumentCreator, DocumentDeleter, DocumentFetcher, DocumentReader, DocumentUpdater},
    config::EngineConfig,
    context::{CancelHandle, Context},
    crud,
    document::{Document, DocumentExt},
    error::{CrudError, CrudResult, FieldErrors},
    filter::{FieldSpec, FieldType, Filter, FilterOp, Rule},
    find::{FindQuery, QuerySchema},
    page::Paginated,
    patch::{Patch, UpdateForm},
    planner::FetchPolicy,
    query::{Expr, FieldOp, Predicate, Sort, SortDirection},
    store::DocumentStore,
    transaction::Transaction,
};
