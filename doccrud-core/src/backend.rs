//! Storage backend abstraction for the CRUD engine.
//!
//! This module defines the traits that abstract over backing document stores, so the engine
//! runs unchanged against an in-memory store in tests and MongoDB in production.
//!
//! # Traits
//!
//! - [`StoreBackend`]: shared, process-wide store client for non-transactional reads and
//!   session creation
//! - [`StoreSession`]: one logical session with explicit transaction begin/commit/abort
//! - [`StoreBackendBuilder`]: factory trait for creating backend instances
//!
//! Writes only happen through a [`StoreSession`], which the engine always wraps in a
//! transaction.
//!
//! # Example
//!
//! ```ignore
//! use doccrud::backend::{StoreBackend, UpdateSpec};
//! use doccrud::query::Predicate;
//!
//! let mut session = backend.start_session().await?;
//! session.start_transaction().await?;
//! session
//!     .find_one_and_update("users", &Predicate::id(user_id), &UpdateSpec::new().add_to_set("places", place_id), ReturnDocument::After)
//!     .await?;
//! session.commit_transaction().await?;
//! ```

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use std::fmt::Debug;

use crate::{
    error::CrudResult,
    query::{Expr, QueryDescriptor},
};

/// Which image of the document a find-and-modify returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnDocument {
    Before,
    After,
}

/// A store-neutral partial update.
///
/// `set` paths may be dotted to reach nested fields. `add_to_set` appends a value to an array
/// unless already present, and `pull` removes every occurrence of a value from an array.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSpec {
    pub set: Document,
    pub add_to_set: Vec<(String, Bson)>,
    pub pull: Vec<(String, Bson)>,
}

impl UpdateSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// An update that sets every field of `set`.
    pub fn set_all(set: Document) -> Self {
        Self { set, ..Self::default() }
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }

    pub fn add_to_set(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.add_to_set.push((field.into(), value.into()));
        self
    }

    pub fn pull(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.pull.push((field.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.add_to_set.is_empty() && self.pull.is_empty()
    }
}

/// Kind of index declared through [`StoreBackend::add_index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Ordinary ascending index.
    Ascending,
    /// Ascending index rejecting duplicate values.
    Unique,
    /// Full-text index over all listed fields.
    Text,
}

/// An index declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub collection: String,
    pub fields: Vec<String>,
    pub kind: IndexKind,
}

impl IndexSpec {
    pub fn new<S: Into<String>>(collection: impl Into<String>, fields: impl IntoIterator<Item = S>, kind: IndexKind) -> Self {
        Self {
            collection: collection.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            kind,
        }
    }
}

/// Abstract interface for document storage backends.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks. A backend is shared process-wide; sessions are per request.
///
/// # Error Handling
///
/// Operations return [`CrudResult<T>`](crate::error::CrudResult). Uniqueness violations must
/// surface as [`CrudError::Conflict`](crate::error::CrudError::Conflict); other store failures
/// as [`CrudError::Backend`](crate::error::CrudError::Backend).
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Starts a new session. The session does not begin a transaction by itself.
    async fn start_session(&self) -> CrudResult<Box<dyn StoreSession>>;

    /// Finds the first document matching `filter`.
    async fn find_one(&self, collection: &str, filter: &Expr) -> CrudResult<Option<Document>>;

    /// Finds the documents selected by a planned query, applying its sort, skip, limit and
    /// projection.
    async fn find(&self, collection: &str, query: &QueryDescriptor) -> CrudResult<Vec<Document>>;

    /// Counts the documents matching `filter`, or every document when `filter` is `None`.
    async fn count(&self, collection: &str, filter: Option<&Expr>) -> CrudResult<u64>;

    /// Declares an index.
    ///
    /// # Arguments
    ///
    /// * `collection` - The collection to index
    /// * `fields` - The indexed fields
    /// * `kind` - Index kind
    async fn add_index(&self, collection: &str, fields: &[String], kind: IndexKind) -> CrudResult<()>;

    /// Releases the backend's resources.
    async fn shutdown(&self) -> CrudResult<()> {
        Ok(())
    }
}

/// One store session.
///
/// Every operation runs inside the session's transaction once
/// [`start_transaction`](StoreSession::start_transaction) was called. Dropping a session with
/// an open transaction discards its writes.
#[async_trait]
pub trait StoreSession: Send {
    async fn start_transaction(&mut self) -> CrudResult<()>;

    async fn commit_transaction(&mut self) -> CrudResult<()>;

    async fn abort_transaction(&mut self) -> CrudResult<()>;

    async fn find_one(&mut self, collection: &str, filter: &Expr) -> CrudResult<Option<Document>>;

    /// Finds every document matching `filter`, unsorted and unprojected.
    async fn find_many(&mut self, collection: &str, filter: &Expr) -> CrudResult<Vec<Document>>;

    async fn count(&mut self, collection: &str, filter: &Expr) -> CrudResult<u64>;

    /// Inserts `document`, which must carry its `_id`, and returns that id.
    async fn insert_one(&mut self, collection: &str, document: Document) -> CrudResult<ObjectId>;

    /// Applies `update` to the first document matching `filter`. Returns `None` when nothing
    /// matched.
    async fn find_one_and_update(
        &mut self,
        collection: &str,
        filter: &Expr,
        update: &UpdateSpec,
        returned: ReturnDocument,
    ) -> CrudResult<Option<Document>>;

    /// Deletes the first document matching `filter` and returns it.
    async fn find_one_and_delete(&mut self, collection: &str, filter: &Expr) -> CrudResult<Option<Document>>;

    /// Deletes every document matching `filter`, returning how many were removed.
    async fn delete_many(&mut self, collection: &str, filter: &Expr) -> CrudResult<u64>;
}

/// Factory trait for constructing [`StoreBackend`] instances.
#[async_trait]
pub trait StoreBackendBuilder {
    /// The concrete [`StoreBackend`] type produced by this builder.
    type Backend: StoreBackend;

    /// Builds and initializes a backend instance.
    ///
    /// # Errors
    ///
    /// Returns [`CrudError::Initialization`](crate::error::CrudError::Initialization) when the
    /// backend cannot be constructed.
    async fn build(self) -> CrudResult<Self::Backend>;
}
