//! Typed, collection-scoped helpers over a [`Transaction`].
//!
//! Hooks use these to express the auxiliary reads and writes that keep related collections
//! consistent, without spelling out predicates and update documents by hand.
//!
//! ```ignore
//! tx.collection("users").add_to_set(creator_id, "places", place_id).await?;
//! ```

use bson::{Bson, Document, oid::ObjectId};

use crate::{
    backend::{ReturnDocument, UpdateSpec},
    document::{Document as StoredDocument, DocumentExt},
    error::{CrudError, CrudResult},
    query::{Expr, Predicate},
    transaction::Transaction,
};

/// A collection reference bound to an open transaction.
pub struct SessionCollection<'t, 'c> {
    name: &'t str,
    tx: &'t mut Transaction<'c>,
}

impl<'t, 'c> SessionCollection<'t, 'c> {
    pub(crate) fn new(name: &'t str, tx: &'t mut Transaction<'c>) -> Self {
        Self { name, tx }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        self.name
    }

    pub async fn find_by_id(&mut self, id: ObjectId) -> CrudResult<Option<Document>> {
        self.tx.find_one(self.name, &Predicate::id(id)).await
    }

    /// Reads and decodes the document with `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CrudError::NotFound`] when no such document exists.
    pub async fn get<D: StoredDocument>(&mut self, id: ObjectId) -> CrudResult<D> {
        match self.find_by_id(id).await? {
            Some(document) => D::from_document(document),
            None => Err(CrudError::not_found(self.name, id)),
        }
    }

    pub async fn exists(&mut self, filter: &Expr) -> CrudResult<bool> {
        Ok(self.tx.count(self.name, filter).await? > 0)
    }

    /// Ensures a document with `id` exists.
    ///
    /// # Errors
    ///
    /// Returns [`CrudError::NotFound`] naming this collection and `id` otherwise.
    pub async fn require(&mut self, id: ObjectId) -> CrudResult<()> {
        if self.exists(&Predicate::id(id)).await? {
            Ok(())
        } else {
            Err(CrudError::not_found(self.name, id))
        }
    }

    pub async fn find(&mut self, filter: &Expr) -> CrudResult<Vec<Document>> {
        self.tx.find_many(self.name, filter).await
    }

    /// Adds `value` to the array `field` of document `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CrudError::NotFound`] when the document does not exist.
    pub async fn add_to_set(&mut self, id: ObjectId, field: &str, value: impl Into<Bson>) -> CrudResult<()> {
        self.modify(id, UpdateSpec::new().add_to_set(field, value)).await
    }

    /// Removes `value` from the array `field` of document `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CrudError::NotFound`] when the document does not exist.
    pub async fn pull(&mut self, id: ObjectId, field: &str, value: impl Into<Bson>) -> CrudResult<()> {
        self.modify(id, UpdateSpec::new().pull(field, value)).await
    }

    pub async fn delete_many(&mut self, filter: &Expr) -> CrudResult<u64> {
        self.tx.delete_many(self.name, filter).await
    }

    async fn modify(&mut self, id: ObjectId, update: UpdateSpec) -> CrudResult<()> {
        self.tx
            .find_one_and_update(self.name, &Predicate::id(id), &update, ReturnDocument::After)
            .await?
            .map(|_| ())
            .ok_or_else(|| CrudError::not_found(self.name, id))
    }
}
