//! Generic CRUD operations over entity adapters.
//!
//! Plain functions take the adapter, the request [`Context`] and, for the `user_*` variants,
//! the calling [`Actor`]. The `user_*` variants add authentication and authorization on top of
//! the unchecked ones.
//!
//! Mutations run in one transaction each:
//!
//! - create: `pre_create` → insert → `post_create` → re-read
//! - update: read pre-image → `pre_update` → patch → `post_update`
//! - delete: find-and-delete → `post_delete`
//!
//! Any failure aborts the transaction, so no partial write is ever visible.

use bson::{Document, oid::ObjectId};
use tracing::{debug, info, warn};

use crate::{
    actor::Actor,
    auth::require_actor,
    backend::ReturnDocument,
    capability::{DocumentCreator, DocumentDeleter, DocumentFetcher, DocumentReader, DocumentUpdater},
    context::Context,
    document::{Document as StoredDocument, DocumentExt},
    error::{CrudError, CrudResult},
    find::FindQuery,
    page::Paginated,
    patch::UpdateForm,
    pipeline::post_process_batch,
    query::{Predicate, QueryDescriptor},
};

/// Parses a caller-supplied record identifier.
///
/// # Errors
///
/// Returns [`CrudError::InvalidId`] when `id` is not a valid native identifier.
pub fn parse_id(id: &str) -> CrudResult<ObjectId> {
    ObjectId::parse_str(id).map_err(|_| CrudError::InvalidId(id.to_string()))
}

async fn find_raw<A: DocumentReader>(adapter: &A, ctx: &Context, id: &str) -> CrudResult<Document> {
    let oid = parse_id(id)?;

    ctx.run(adapter.store().backend().find_one(adapter.collection_name(), &Predicate::id(oid)))
        .await?
        .ok_or_else(|| CrudError::not_found(adapter.collection_name(), id))
}

/// Reads one record.
///
/// # Errors
///
/// Returns [`CrudError::InvalidId`] for a malformed id and [`CrudError::NotFound`] when no such
/// record exists.
pub async fn get_by_id<A: DocumentReader>(adapter: &A, ctx: &Context, id: &str) -> CrudResult<A::Read> {
    let raw = find_raw(adapter, ctx, id).await?;

    adapter.post_process(raw).await
}

/// Reads one record on behalf of `actor`.
///
/// Existence is checked before authentication and ownership, so a missing record reports
/// [`CrudError::NotFound`] to every caller.
pub async fn user_get_by_id<A: DocumentReader>(
    adapter: &A,
    ctx: &Context,
    actor: Option<&Actor>,
    id: &str,
) -> CrudResult<A::Read> {
    let raw = find_raw(adapter, ctx, id).await?;
    let actor = require_actor(actor)?;
    adapter.auth_read(actor, &raw)?;

    adapter.post_process(raw).await
}

async fn find_page<A: DocumentFetcher>(
    adapter: &A,
    ctx: &Context,
    query: &FindQuery,
) -> CrudResult<(QueryDescriptor, u64, Vec<Document>)> {
    let descriptor = adapter.store().planner().plan(query, adapter)?;
    let backend = adapter.store().backend();
    let collection = adapter.collection_name();

    let total = ctx.run(backend.count(collection, descriptor.predicate())).await?;
    let documents = ctx.run(backend.find(collection, &descriptor)).await?;

    debug!(collection, total, returned = documents.len(), "fetched page");

    Ok((descriptor, total, documents))
}

/// Lists records as typed output values.
///
/// # Errors
///
/// Rejects queries with an explicit projection, which typed output cannot represent; use
/// [`fetch_document_page`] for those. Fails as a whole when any record fails
/// post-processing.
pub async fn fetch_page<A: DocumentFetcher>(
    adapter: &A,
    ctx: &Context,
    query: &FindQuery,
) -> CrudResult<Paginated<A::Read>> {
    if !query.fields.is_empty() {
        return Err(CrudError::validation(
            "fields",
            "field selection is only supported when fetching raw documents",
        ));
    }

    let (descriptor, total, documents) = find_page(adapter, ctx, query).await?;
    let data = post_process_batch(documents, |raw| adapter.post_process(raw)).await?;

    Ok(Paginated::new(descriptor.pagination(), total, data))
}

/// Lists records as raw documents, honoring the query's projection.
pub async fn fetch_document_page<A: DocumentFetcher>(
    adapter: &A,
    ctx: &Context,
    query: &FindQuery,
) -> CrudResult<Paginated<Document>> {
    let (descriptor, total, documents) = find_page(adapter, ctx, query).await?;
    let data = post_process_batch(documents, |raw| adapter.post_process_raw(raw)).await?;

    Ok(Paginated::new(descriptor.pagination(), total, data))
}

/// Lists the records visible to `actor`. Non-admin actors only see what they own; the
/// restriction is part of the query, so counts and pages reflect it.
pub async fn user_fetch_page<A: DocumentFetcher>(
    adapter: &A,
    ctx: &Context,
    actor: Option<&Actor>,
    mut query: FindQuery,
) -> CrudResult<Paginated<A::Read>> {
    let actor = require_actor(actor)?;
    adapter.add_ownership_filters(actor, &mut query);

    fetch_page(adapter, ctx, &query).await
}

/// Raw-document variant of [`user_fetch_page`].
pub async fn user_fetch_document_page<A: DocumentFetcher>(
    adapter: &A,
    ctx: &Context,
    actor: Option<&Actor>,
    mut query: FindQuery,
) -> CrudResult<Paginated<Document>> {
    let actor = require_actor(actor)?;
    adapter.add_ownership_filters(actor, &mut query);

    fetch_document_page(adapter, ctx, &query).await
}

/// Creates a record.
///
/// # Errors
///
/// Returns whatever the adapter's preparation or hooks fail with, a
/// [`CrudError::Conflict`] on uniqueness violations, or [`CrudError::Transaction`] for other
/// store failures. Nothing is written on failure.
pub async fn create<A: DocumentCreator>(adapter: &A, ctx: &Context, post: A::Post) -> CrudResult<A::Read> {
    let form = adapter.to_create_form(post).await?;
    let doc = adapter.to_db_doc(form)?;

    match insert(adapter, ctx, &doc).await {
        Ok(raw) => {
            info!(collection = adapter.collection_name(), id = %doc.id(), "document created");
            adapter.post_process(raw).await
        }
        Err(err) => {
            if let Some(reference) = adapter.uploaded_blob(&doc) {
                if let Err(cleanup) = adapter.store().blobs().delete(reference).await {
                    warn!(reference, error = %cleanup, "failed to remove blob of failed creation");
                }
            }
            Err(err)
        }
    }
}

async fn insert<A: DocumentCreator>(adapter: &A, ctx: &Context, doc: &A::Db) -> CrudResult<Document> {
    let collection = adapter.collection_name();
    let mut tx = adapter.store().begin(ctx).await?;

    let outcome = async {
        adapter.pre_create(&mut tx, doc).await?;
        let id = tx.insert_one(collection, doc.to_document()?).await?;
        adapter.post_create(&mut tx, doc).await?;

        tx.find_one(collection, &Predicate::id(id))
            .await?
            .ok_or_else(|| CrudError::not_found(collection, id))
    }
    .await;

    tx.finish(outcome).await
}

/// Creates a record on behalf of `actor`.
pub async fn user_create<A: DocumentCreator>(
    adapter: &A,
    ctx: &Context,
    actor: Option<&Actor>,
    post: A::Post,
) -> CrudResult<A::Read> {
    let actor = require_actor(actor)?;
    adapter.auth_create(actor, &post)?;

    create(adapter, ctx, post).await
}

/// Applies a partial update to a record.
///
/// # Errors
///
/// Returns [`CrudError::NotFound`] when the record does not exist, and hook or store errors as
/// for [`create`]. Nothing is written on failure.
pub async fn update_by_id<A: DocumentUpdater>(
    adapter: &A,
    ctx: &Context,
    id: &str,
    put: A::Put,
) -> CrudResult<A::Read> {
    let oid = parse_id(id)?;
    let form = adapter.to_update_form(put).await?;

    let after = update(adapter, ctx, None, oid, &form).await?;
    adapter.post_process(after).await
}

/// Applies a partial update on behalf of `actor`, who must be allowed to read and update the
/// record.
pub async fn user_update_by_id<A: DocumentUpdater>(
    adapter: &A,
    ctx: &Context,
    actor: Option<&Actor>,
    id: &str,
    put: A::Put,
) -> CrudResult<A::Read> {
    let actor = require_actor(actor)?;
    let oid = parse_id(id)?;
    let form = adapter.to_update_form(put).await?;

    let after = update(adapter, ctx, Some(actor), oid, &form).await?;
    adapter.post_process(after).await
}

async fn update<A: DocumentUpdater>(
    adapter: &A,
    ctx: &Context,
    actor: Option<&Actor>,
    id: ObjectId,
    form: &A::Form,
) -> CrudResult<Document> {
    let collection = adapter.collection_name();
    let filter = Predicate::id(id);
    let update = form.patch()?.into_update(chrono::Utc::now());
    let mut tx = adapter.store().begin(ctx).await?;

    let outcome = async {
        let before = tx
            .find_one(collection, &filter)
            .await?
            .ok_or_else(|| CrudError::not_found(collection, id))?;

        if let Some(actor) = actor {
            adapter.auth_read(actor, &before)?;
            adapter.auth_update(actor, &before, form)?;
        }

        adapter.pre_update(&mut tx, &before, form).await?;

        let after = tx
            .find_one_and_update(collection, &filter, &update, ReturnDocument::After)
            .await?
            .ok_or_else(|| CrudError::not_found(collection, id))?;

        adapter.post_update(&mut tx, &before, &after).await?;

        Ok::<_, CrudError>(after)
    }
    .await;

    let after = tx.finish(outcome).await?;
    info!(collection, %id, "document updated");

    Ok(after)
}

/// Deletes a record.
///
/// # Errors
///
/// Returns [`CrudError::NotFound`] when the record does not exist, and hook or store errors as
/// for [`create`].
pub async fn delete_by_id<A: DocumentDeleter>(adapter: &A, ctx: &Context, id: &str) -> CrudResult<()> {
    delete(adapter, ctx, None, parse_id(id)?).await
}

/// Deletes a record on behalf of `actor`, who must be allowed to delete it.
pub async fn user_delete_by_id<A: DocumentDeleter>(
    adapter: &A,
    ctx: &Context,
    actor: Option<&Actor>,
    id: &str,
) -> CrudResult<()> {
    let actor = require_actor(actor)?;

    delete(adapter, ctx, Some(actor), parse_id(id)?).await
}

async fn delete<A: DocumentDeleter>(adapter: &A, ctx: &Context, actor: Option<&Actor>, id: ObjectId) -> CrudResult<()> {
    let collection = adapter.collection_name();
    let filter = Predicate::id(id);
    let mut tx = adapter.store().begin(ctx).await?;

    let outcome = async {
        if let Some(actor) = actor {
            let existing = tx
                .find_one(collection, &filter)
                .await?
                .ok_or_else(|| CrudError::not_found(collection, id))?;

            adapter.auth_delete(actor, &existing)?;
        }

        let deleted = tx
            .find_one_and_delete(collection, &filter)
            .await?
            .ok_or_else(|| CrudError::not_found(collection, id))?;

        adapter.post_delete(&mut tx, &deleted).await
    }
    .await;

    tx.finish(outcome).await?;
    info!(collection, %id, "document deleted");

    Ok(())
}
