//! Per-entity capability traits.
//!
//! Each entity supplies one adapter type implementing the capabilities it supports. The
//! generic functions in [`crud`](crate::crud) are bounded on these traits and take their DTO
//! types from the associated types, so every entity keeps its own typed inputs and outputs.
//!
//! | capability | used by |
//! | --- | --- |
//! | [`DocumentReader`] | `get_by_id`, `user_get_by_id` |
//! | [`DocumentFetcher`] | `fetch_page`, `fetch_document_page`, `user_fetch_page` |
//! | [`DocumentCreator`] | `create`, `user_create` |
//! | [`DocumentUpdater`] | `update_by_id`, `user_update_by_id` |
//! | [`DocumentDeleter`] | `delete_by_id`, `user_delete_by_id` |

use async_trait::async_trait;
use bson::{Document, oid::ObjectId};
use serde::Serialize;

use crate::{
    actor::Actor,
    auth::authorize_owner,
    document::{Document as StoredDocument, document_id, externalize},
    error::CrudResult,
    filter::Filter,
    find::{FindQuery, QuerySchema},
    patch::UpdateForm,
    planner::FetchPolicy,
    store::DocumentStore,
    transaction::Transaction,
};

/// Reading single records.
#[async_trait]
pub trait DocumentReader: Send + Sync {
    /// Output representation returned to callers.
    type Read: Serialize + Send;

    fn store(&self) -> &DocumentStore;

    fn collection_name(&self) -> &'static str;

    /// Decodes a complete stored document into its output representation, resolving stored
    /// references such as blob keys.
    async fn post_process(&self, raw: Document) -> CrudResult<Self::Read>;

    /// Enriches a projected document, which may lack any field. The default only externalizes
    /// identifiers.
    async fn post_process_raw(&self, raw: Document) -> CrudResult<Document> {
        Ok(externalize(raw))
    }

    /// Identity that owns a stored record.
    fn owner_of(&self, raw: &Document) -> CrudResult<ObjectId>;

    /// Whether `actor` may read `raw`. Defaults to admin-or-owner.
    fn auth_read(&self, actor: &Actor, raw: &Document) -> CrudResult<()> {
        authorize_owner(actor, self.owner_of(raw)?, self.collection_name(), document_id(raw)?)
    }
}

/// Listing and searching.
pub trait DocumentFetcher: DocumentReader + FetchPolicy {
    /// What callers may filter, sort and select on.
    fn query_schema(&self) -> QuerySchema;

    /// Logical identifier field that must equal the actor's id for non-admin listings.
    fn ownership_field(&self) -> &'static str;

    /// Restricts `query` to the records `actor` owns. Administrators see everything.
    fn add_ownership_filters(&self, actor: &Actor, query: &mut FindQuery) {
        if !actor.is_admin {
            query.add_filter(self.ownership_field(), Filter::eq(actor.id.to_hex()));
        }
    }
}

/// Creating records.
#[async_trait]
pub trait DocumentCreator: DocumentReader {
    /// Incoming creation payload.
    type Post: Send + Sync;
    /// Payload after preparation (hashing, uploads).
    type Form: Send;
    /// Storage representation.
    type Db: StoredDocument;

    /// Prepares a payload. Runs before the transaction starts.
    async fn to_create_form(&self, post: Self::Post) -> CrudResult<Self::Form>;

    /// Builds the storage document, including its identifier and timestamps.
    fn to_db_doc(&self, form: Self::Form) -> CrudResult<Self::Db>;

    fn auth_create(&self, actor: &Actor, post: &Self::Post) -> CrudResult<()>;

    /// Validates referenced records before the insert.
    async fn pre_create(&self, _tx: &mut Transaction<'_>, _doc: &Self::Db) -> CrudResult<()> {
        Ok(())
    }

    /// Performs auxiliary writes after the insert.
    async fn post_create(&self, _tx: &mut Transaction<'_>, _doc: &Self::Db) -> CrudResult<()> {
        Ok(())
    }

    /// Blob uploaded while preparing `doc`, removed again when the creation fails.
    fn uploaded_blob<'d>(&self, _doc: &'d Self::Db) -> Option<&'d str> {
        None
    }
}

/// Updating records.
#[async_trait]
pub trait DocumentUpdater: DocumentReader {
    /// Incoming update payload.
    type Put: Send + Sync;
    /// Prepared update; only supplied fields are written.
    type Form: UpdateForm + Send + Sync;

    /// Prepares a payload. Runs before the transaction starts.
    async fn to_update_form(&self, put: Self::Put) -> CrudResult<Self::Form>;

    /// Whether `actor` may apply `form` to `before`. Runs after [`DocumentReader::auth_read`].
    fn auth_update(&self, actor: &Actor, before: &Document, form: &Self::Form) -> CrudResult<()>;

    /// Validates records newly referenced by `form`.
    async fn pre_update(&self, _tx: &mut Transaction<'_>, _before: &Document, _form: &Self::Form) -> CrudResult<()> {
        Ok(())
    }

    /// Reconciles derived state after the update.
    async fn post_update(&self, _tx: &mut Transaction<'_>, _before: &Document, _after: &Document) -> CrudResult<()> {
        Ok(())
    }
}

/// Deleting records.
#[async_trait]
pub trait DocumentDeleter: DocumentReader {
    /// Whether `actor` may delete `raw`. Defaults to [`DocumentReader::auth_read`].
    fn auth_delete(&self, actor: &Actor, raw: &Document) -> CrudResult<()> {
        self.auth_read(actor, raw)
    }

    /// Removes references to the deleted record and cleans up its blobs.
    async fn post_delete(&self, _tx: &mut Transaction<'_>, _deleted: &Document) -> CrudResult<()> {
        Ok(())
    }
}
