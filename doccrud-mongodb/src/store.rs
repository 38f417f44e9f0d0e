use async_trait::async_trait;
use bson::{Document, doc, oid::ObjectId};
use futures::TryStreamExt;
use mongodb::{
    Client, ClientSession, Collection as MongoCollection, Database, IndexModel,
    error::{Error as MongoError, ErrorKind, TRANSIENT_TRANSACTION_ERROR, WriteFailure},
    options::{
        ClientOptions, Collation, CollationStrength, CountOptions, FindOptions, IndexOptions,
        ReturnDocument as MongoReturnDocument,
    },
};
use tracing::{debug, info};

use doccrud_core::{
    backend::{IndexKind, ReturnDocument, StoreBackend, StoreBackendBuilder, StoreSession, UpdateSpec},
    error::{CrudError, CrudResult},
    query::{Expr, QueryDescriptor, QueryVisitor},
};

use crate::query::{MongoQueryTranslator, projection_document, sort_document, update_document};

const DUPLICATE_KEY: i32 = 11000;

/// Sorting and comparisons ignore case.
fn collation() -> Collation {
    Collation::builder()
        .locale("en".to_string())
        .strength(CollationStrength::Secondary)
        .build()
}

fn is_duplicate_key(err: &MongoError) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == DUPLICATE_KEY,
        ErrorKind::Command(command) => command.code == DUPLICATE_KEY,
        _ => false,
    }
}

/// Maps driver errors into the engine taxonomy.
fn map_error(err: MongoError) -> CrudError {
    if is_duplicate_key(&err) {
        CrudError::Conflict(err.to_string())
    } else if err.contains_label(TRANSIENT_TRANSACTION_ERROR) {
        CrudError::Transaction(err.to_string())
    } else {
        CrudError::Backend(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct MongoDbStore {
    client: Client,
    database: String,
    text_search_language: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database, text_search_language: "english".to_string() }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn database(&self) -> Database {
        self.client.database(&self.database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.database().collection(collection_name)
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn start_session(&self) -> CrudResult<Box<dyn StoreSession>> {
        let session = self.client.start_session().await.map_err(map_error)?;

        Ok(Box::new(MongoSession { database: self.database(), session }))
    }

    async fn find_one(&self, collection: &str, filter: &Expr) -> CrudResult<Option<Document>> {
        self.get_collection(collection)
            .find_one(MongoQueryTranslator.visit_expr(filter)?)
            .await
            .map_err(map_error)
    }

    async fn find(&self, collection: &str, query: &QueryDescriptor) -> CrudResult<Vec<Document>> {
        let mut options = FindOptions::default();
        options.sort = Some(sort_document(query.sort()));
        options.skip = Some(query.skip());
        options.limit = Some(i64::try_from(query.limit()).unwrap_or(i64::MAX));
        options.projection = projection_document(query.projection());
        options.collation = Some(collation());

        self.get_collection(collection)
            .find(MongoQueryTranslator::filter(query.predicate())?)
            .with_options(options)
            .await
            .map_err(map_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(map_error)
    }

    async fn count(&self, collection: &str, filter: Option<&Expr>) -> CrudResult<u64> {
        let mut options = CountOptions::default();
        options.collation = Some(collation());

        self.get_collection(collection)
            .count_documents(MongoQueryTranslator::filter(filter)?)
            .with_options(options)
            .await
            .map_err(map_error)
    }

    async fn add_index(&self, collection: &str, fields: &[String], kind: IndexKind) -> CrudResult<()> {
        let model = match kind {
            IndexKind::Ascending | IndexKind::Unique => IndexModel::builder()
                .keys(fields.iter().map(|field| (field.clone(), 1.into())).collect::<Document>())
                .options(IndexOptions::builder().unique(kind == IndexKind::Unique).build())
                .build(),
            IndexKind::Text => IndexModel::builder()
                .keys(fields.iter().map(|field| (field.clone(), "text".into())).collect::<Document>())
                .options(
                    IndexOptions::builder()
                        .default_language(self.text_search_language.clone())
                        .build(),
                )
                .build(),
        };

        self.get_collection(collection)
            .create_index(model)
            .await
            .map_err(map_error)?;

        debug!(collection, ?fields, ?kind, "index created");

        Ok(())
    }

    async fn shutdown(&self) -> CrudResult<()> {
        self.client.clone().shutdown().await;
        info!(database = %self.database, "mongodb client shut down");

        Ok(())
    }
}

/// A MongoDB client session.
pub struct MongoSession {
    database: Database,
    session: ClientSession,
}

impl MongoSession {
    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.database.collection(collection_name)
    }
}

#[async_trait]
impl StoreSession for MongoSession {
    async fn start_transaction(&mut self) -> CrudResult<()> {
        self.session.start_transaction().await.map_err(map_error)
    }

    async fn commit_transaction(&mut self) -> CrudResult<()> {
        self.session.commit_transaction().await.map_err(map_error)
    }

    async fn abort_transaction(&mut self) -> CrudResult<()> {
        self.session.abort_transaction().await.map_err(map_error)
    }

    async fn find_one(&mut self, collection: &str, filter: &Expr) -> CrudResult<Option<Document>> {
        self.get_collection(collection)
            .find_one(MongoQueryTranslator.visit_expr(filter)?)
            .session(&mut self.session)
            .await
            .map_err(map_error)
    }

    async fn find_many(&mut self, collection: &str, filter: &Expr) -> CrudResult<Vec<Document>> {
        let mut cursor = self
            .get_collection(collection)
            .find(MongoQueryTranslator.visit_expr(filter)?)
            .session(&mut self.session)
            .await
            .map_err(map_error)?;

        cursor
            .stream(&mut self.session)
            .try_collect::<Vec<Document>>()
            .await
            .map_err(map_error)
    }

    async fn count(&mut self, collection: &str, filter: &Expr) -> CrudResult<u64> {
        self.get_collection(collection)
            .count_documents(MongoQueryTranslator.visit_expr(filter)?)
            .session(&mut self.session)
            .await
            .map_err(map_error)
    }

    async fn insert_one(&mut self, collection: &str, document: Document) -> CrudResult<ObjectId> {
        let result = self
            .get_collection(collection)
            .insert_one(document)
            .session(&mut self.session)
            .await
            .map_err(map_error)?;

        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| CrudError::Backend(format!("{collection} insert returned a non object id key")))
    }

    async fn find_one_and_update(
        &mut self,
        collection: &str,
        filter: &Expr,
        update: &UpdateSpec,
        returned: ReturnDocument,
    ) -> CrudResult<Option<Document>> {
        let returned = match returned {
            ReturnDocument::Before => MongoReturnDocument::Before,
            ReturnDocument::After => MongoReturnDocument::After,
        };

        self.get_collection(collection)
            .find_one_and_update(MongoQueryTranslator.visit_expr(filter)?, update_document(update))
            .return_document(returned)
            .session(&mut self.session)
            .await
            .map_err(map_error)
    }

    async fn find_one_and_delete(&mut self, collection: &str, filter: &Expr) -> CrudResult<Option<Document>> {
        self.get_collection(collection)
            .find_one_and_delete(MongoQueryTranslator.visit_expr(filter)?)
            .session(&mut self.session)
            .await
            .map_err(map_error)
    }

    async fn delete_many(&mut self, collection: &str, filter: &Expr) -> CrudResult<u64> {
        let result = self
            .get_collection(collection)
            .delete_many(MongoQueryTranslator.visit_expr(filter)?)
            .session(&mut self.session)
            .await
            .map_err(map_error)?;

        Ok(result.deleted_count)
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
    text_search_language: Option<String>,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
            text_search_language: None,
        }
    }

    /// Default language of text indexes created by this store.
    pub fn text_search_language(mut self, language: impl Into<String>) -> Self {
        self.text_search_language = Some(language.into());
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> CrudResult<Self::Backend> {
        let client = Client::with_options(
            ClientOptions::parse(&self.dsn)
                .await
                .map_err(|e| CrudError::Initialization(e.to_string()))?,
        )
        .map_err(|e| CrudError::Initialization(e.to_string()))?;

        client
            .database(&self.database)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| CrudError::Initialization(e.to_string()))?;

        info!(database = %self.database, "connected to mongodb");

        let mut store = MongoDbStore::new(client, self.database);
        if let Some(language) = self.text_search_language {
            store.text_search_language = language;
        }

        Ok(store)
    }
}
