//! Session-scoped atomic transactions.
//!
//! A [`Transaction`] owns one store session with an open transaction. Every operation runs
//! under the request's [`Context`], and [`Transaction::finish`] either commits the whole unit or
//! aborts it. A transaction dropped without finishing is discarded by its session.
//!
//! ```ignore
//! let mut tx = store.begin(&ctx).await?;
//! let outcome = async {
//!     let id = tx.insert_one("places", place).await?;
//!     tx.collection("users").add_to_set(creator, "places", id).await?;
//!     Ok(id)
//! }
//! .await;
//! let id = tx.finish(outcome).await?;
//! ```

use bson::{Document, oid::ObjectId};
use tracing::{debug, error, warn};

use crate::{
    backend::{ReturnDocument, StoreBackend, StoreSession, UpdateSpec},
    collection::SessionCollection,
    context::Context,
    error::{CrudError, CrudResult},
    query::Expr,
};

pub struct Transaction<'c> {
    session: Box<dyn StoreSession>,
    ctx: &'c Context,
}

impl<'c> Transaction<'c> {
    pub(crate) async fn begin(backend: &dyn StoreBackend, ctx: &'c Context) -> CrudResult<Self> {
        let mut session = ctx.run(backend.start_session()).await?;
        ctx.run(session.start_transaction()).await?;

        debug!("transaction started");

        Ok(Self { session, ctx })
    }

    pub fn context(&self) -> &Context {
        self.ctx
    }

    /// Typed helpers for one collection.
    pub fn collection<'t>(&'t mut self, name: &'t str) -> SessionCollection<'t, 'c> {
        SessionCollection::new(name, self)
    }

    pub async fn find_one(&mut self, collection: &str, filter: &Expr) -> CrudResult<Option<Document>> {
        self.ctx.run(self.session.find_one(collection, filter)).await
    }

    pub async fn find_many(&mut self, collection: &str, filter: &Expr) -> CrudResult<Vec<Document>> {
        self.ctx.run(self.session.find_many(collection, filter)).await
    }

    pub async fn count(&mut self, collection: &str, filter: &Expr) -> CrudResult<u64> {
        self.ctx.run(self.session.count(collection, filter)).await
    }

    pub async fn insert_one(&mut self, collection: &str, document: Document) -> CrudResult<ObjectId> {
        self.ctx.run(self.session.insert_one(collection, document)).await
    }

    pub async fn find_one_and_update(
        &mut self,
        collection: &str,
        filter: &Expr,
        update: &UpdateSpec,
        returned: ReturnDocument,
    ) -> CrudResult<Option<Document>> {
        self.ctx
            .run(self.session.find_one_and_update(collection, filter, update, returned))
            .await
    }

    pub async fn find_one_and_delete(&mut self, collection: &str, filter: &Expr) -> CrudResult<Option<Document>> {
        self.ctx.run(self.session.find_one_and_delete(collection, filter)).await
    }

    pub async fn delete_many(&mut self, collection: &str, filter: &Expr) -> CrudResult<u64> {
        self.ctx.run(self.session.delete_many(collection, filter)).await
    }

    /// Commits when `outcome` is `Ok` and the context is still live, aborts otherwise.
    ///
    /// # Errors
    ///
    /// Returns the failure that caused the abort, or the commit failure. Errors outside the
    /// known taxonomy are reported as [`CrudError::Transaction`].
    pub async fn finish<T>(mut self, outcome: CrudResult<T>) -> CrudResult<T> {
        let outcome = outcome.and_then(|value| self.ctx.check().map(|()| value));

        match outcome {
            Ok(value) => match self.session.commit_transaction().await {
                Ok(()) => {
                    debug!("transaction committed");
                    Ok(value)
                }
                Err(err) => {
                    self.abort(&err).await;
                    Err(into_transaction_error(err))
                }
            },
            Err(err) => {
                self.abort(&err).await;
                Err(into_transaction_error(err))
            }
        }
    }

    async fn abort(&mut self, cause: &CrudError) {
        warn!(error = %cause, "aborting transaction");

        if let Err(err) = self.session.abort_transaction().await {
            error!(error = %err, "failed to abort transaction");
        }
    }
}

fn into_transaction_error(err: CrudError) -> CrudError {
    if err.is_known() {
        err
    } else {
        CrudError::Transaction(err.to_string())
    }
}
