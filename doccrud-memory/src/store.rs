//! In-memory storage implementation for document stores.
//!
//! Documents live in per-collection ordered maps keyed by their `_id`, behind an async-aware
//! read-write lock. Sessions stage their writes against a snapshot of each collection they
//! touch and publish them atomically on commit.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use mea::rwlock::RwLock;
use tracing::{debug, warn};

use doccrud_core::{
    backend::{IndexKind, ReturnDocument, StoreBackend, StoreBackendBuilder, StoreSession, UpdateSpec},
    error::{CrudError, CrudResult},
    planner::ID_FIELD,
    query::{Expr, Projection, QueryDescriptor, SortDirection},
};

use crate::evaluator::{DocumentEvaluator, lookup, sort_cmp};

type Collection = BTreeMap<ObjectId, Document>;

#[derive(Debug, Default, Clone)]
struct Indexes {
    unique: Vec<Vec<String>>,
    text: Vec<String>,
}

#[derive(Debug, Default)]
struct StoreState {
    collections: HashMap<String, Collection>,
    indexes: HashMap<String, Indexes>,
}

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, so clones share the
/// same underlying data.
///
/// # Indexes
///
/// Unique indexes are enforced on every write and on commit. A text index makes text
/// predicates search all of its fields. Ascending indexes are accepted and ignored.
///
/// # Transactions
///
/// A session with an open transaction reads a snapshot of every collection it touches, taken
/// on first access, together with its own writes. Commit fails with
/// [`CrudError::Transaction`] when a document it wrote was changed by someone else since the
/// snapshot. Operations outside a transaction commit immediately.
///
/// # Example
///
/// ```ignore
/// use doccrud_memory::InMemoryStore;
/// use doccrud::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder().build().await?;
/// let mut session = store.start_session().await?;
/// session.insert_one("users", doc! { "_id": ObjectId::new(), "name": "Alice" }).await?;
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn start_session(&self) -> CrudResult<Box<dyn StoreSession>> {
        Ok(Box::new(MemorySession::new(self.state.clone())))
    }

    async fn find_one(&self, collection: &str, filter: &Expr) -> CrudResult<Option<Document>> {
        let state = self.state.read().await;
        let Some(docs) = state.collections.get(collection) else {
            return Ok(None);
        };

        Ok(select(docs, Some(filter), state.text_fields(collection))?
            .into_iter()
            .next()
            .cloned())
    }

    async fn find(&self, collection: &str, query: &QueryDescriptor) -> CrudResult<Vec<Document>> {
        let state = self.state.read().await;
        let Some(docs) = state.collections.get(collection) else {
            return Ok(vec![]);
        };

        let mut matched = select(docs, query.predicate(), state.text_fields(collection))?;

        matched.sort_by(|a, b| {
            query.sort().iter().fold(Ordering::Equal, |ordering, sort| {
                ordering.then_with(|| {
                    let ordering = sort_cmp(lookup(a, &sort.field), lookup(b, &sort.field));

                    match sort.direction {
                        SortDirection::Asc => ordering,
                        SortDirection::Desc => ordering.reverse(),
                    }
                })
            })
        });

        matched
            .into_iter()
            .skip(usize::try_from(query.skip()).unwrap_or(usize::MAX))
            .take(usize::try_from(query.limit()).unwrap_or(usize::MAX))
            .map(|document| project(document, query.projection()))
            .collect()
    }

    async fn count(&self, collection: &str, filter: Option<&Expr>) -> CrudResult<u64> {
        let state = self.state.read().await;
        let Some(docs) = state.collections.get(collection) else {
            return Ok(0);
        };

        Ok(select(docs, filter, state.text_fields(collection))?.len() as u64)
    }

    async fn add_index(&self, collection: &str, fields: &[String], kind: IndexKind) -> CrudResult<()> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        match kind {
            IndexKind::Ascending => {}
            IndexKind::Unique => {
                let fields = fields.to_vec();

                if let Some(docs) = state.collections.get(collection) {
                    for document in docs.values() {
                        check_unique(collection, std::slice::from_ref(&fields), docs, document)?;
                    }
                }

                let indexes = state.indexes.entry(collection.to_string()).or_default();
                if !indexes.unique.contains(&fields) {
                    indexes.unique.push(fields);
                }
            }
            IndexKind::Text => {
                state.indexes.entry(collection.to_string()).or_default().text = fields.to_vec();
            }
        }

        debug!(collection, ?fields, ?kind, "index declared");

        Ok(())
    }
}

impl StoreState {
    fn text_fields(&self, collection: &str) -> &[String] {
        self.indexes.get(collection).map_or(&[], |indexes| indexes.text.as_slice())
    }
}

/// Writes staged by an open transaction.
#[derive(Debug, Default)]
struct Staged {
    /// Snapshot of every touched collection, with this transaction's writes applied.
    collections: HashMap<String, Collection>,
    /// The snapshot image of every written document, `None` for inserts.
    originals: HashMap<(String, ObjectId), Option<Document>>,
}

impl Staged {
    fn docs(&mut self, collection: &str) -> &mut Collection {
        self.collections.entry(collection.to_string()).or_default()
    }

    fn touch(&mut self, collection: &str, id: ObjectId, original: Option<Document>) {
        self.originals.entry((collection.to_string(), id)).or_insert(original);
    }

    fn first_match(&mut self, collection: &str, filter: &Expr, indexes: &Indexes) -> CrudResult<Option<ObjectId>> {
        for (id, document) in self.docs(collection).iter() {
            if DocumentEvaluator::matches(document, Some(filter), &indexes.text)? {
                return Ok(Some(*id));
            }
        }

        Ok(None)
    }

    fn find_many(&mut self, collection: &str, filter: &Expr, indexes: &Indexes) -> CrudResult<Vec<Document>> {
        Ok(select(self.docs(collection), Some(filter), &indexes.text)?
            .into_iter()
            .cloned()
            .collect())
    }

    fn insert_one(&mut self, collection: &str, document: Document, indexes: &Indexes) -> CrudResult<ObjectId> {
        let id = document
            .get_object_id(ID_FIELD)
            .map_err(|_| CrudError::Backend(format!("document inserted into {collection} has no {ID_FIELD}")))?;
        let docs = self.docs(collection);

        if docs.contains_key(&id) {
            return Err(CrudError::Conflict(format!("{collection} document {id} already exists")));
        }
        check_unique(collection, &indexes.unique, docs, &document)?;

        docs.insert(id, document);
        self.touch(collection, id, None);

        Ok(id)
    }

    fn find_one_and_update(
        &mut self,
        collection: &str,
        filter: &Expr,
        update: &UpdateSpec,
        returned: ReturnDocument,
        indexes: &Indexes,
    ) -> CrudResult<Option<Document>> {
        let Some(id) = self.first_match(collection, filter, indexes)? else {
            return Ok(None);
        };
        let docs = self.docs(collection);
        let Some(before) = docs.get(&id).cloned() else {
            return Ok(None);
        };

        let mut after = before.clone();
        apply_update(&mut after, update)?;
        check_unique(collection, &indexes.unique, docs, &after)?;

        docs.insert(id, after.clone());
        self.touch(collection, id, Some(before.clone()));

        Ok(Some(match returned {
            ReturnDocument::Before => before,
            ReturnDocument::After => after,
        }))
    }

    fn find_one_and_delete(&mut self, collection: &str, filter: &Expr, indexes: &Indexes) -> CrudResult<Option<Document>> {
        let Some(id) = self.first_match(collection, filter, indexes)? else {
            return Ok(None);
        };
        let removed = self.docs(collection).remove(&id);

        if let Some(document) = &removed {
            self.touch(collection, id, Some(document.clone()));
        }

        Ok(removed)
    }

    fn delete_many(&mut self, collection: &str, filter: &Expr, indexes: &Indexes) -> CrudResult<u64> {
        let mut ids = Vec::new();
        for (id, document) in self.docs(collection).iter() {
            if DocumentEvaluator::matches(document, Some(filter), &indexes.text)? {
                ids.push(*id);
            }
        }

        for id in &ids {
            if let Some(document) = self.docs(collection).remove(id) {
                self.touch(collection, *id, Some(document));
            }
        }

        Ok(ids.len() as u64)
    }
}

/// A session on an [`InMemoryStore`].
pub struct MemorySession {
    state: Arc<RwLock<StoreState>>,
    transaction: Option<Staged>,
}

impl MemorySession {
    fn new(state: Arc<RwLock<StoreState>>) -> Self {
        Self { state, transaction: None }
    }

    /// Runs `op` against the staged view of `collection`. Outside a transaction the writes are
    /// published right away.
    async fn run<T>(&mut self, collection: &str, op: impl FnOnce(&mut Staged, &Indexes) -> CrudResult<T>) -> CrudResult<T> {
        let (snapshot, indexes) = {
            let state = self.state.read().await;
            let loaded = self
                .transaction
                .as_ref()
                .is_some_and(|staged| staged.collections.contains_key(collection));
            let snapshot = if loaded { None } else { Some(state.collections.get(collection).cloned().unwrap_or_default()) };

            (snapshot, state.indexes.get(collection).cloned().unwrap_or_default())
        };

        let implicit = self.transaction.is_none();
        let mut staged = self.transaction.take().unwrap_or_default();
        if let Some(snapshot) = snapshot {
            staged.collections.insert(collection.to_string(), snapshot);
        }

        let result = op(&mut staged, &indexes);

        if implicit {
            let value = result?;
            self.publish(staged).await?;
            Ok(value)
        } else {
            self.transaction = Some(staged);
            result
        }
    }

    /// Publishes staged writes atomically.
    async fn publish(&self, staged: Staged) -> CrudResult<()> {
        if staged.originals.is_empty() {
            return Ok(());
        }

        let mut guard = self.state.write().await;
        let state = &mut *guard;

        for ((collection, id), original) in &staged.originals {
            let live = state.collections.get(collection).and_then(|docs| docs.get(id));

            if live != original.as_ref() {
                warn!(collection = %collection, %id, "write conflict");
                return Err(CrudError::Transaction(format!("write conflict on {collection} document {id}")));
            }
        }

        let mut merged: HashMap<&str, Collection> = HashMap::new();
        for (collection, id) in staged.originals.keys() {
            let docs = merged
                .entry(collection.as_str())
                .or_insert_with(|| state.collections.get(collection).cloned().unwrap_or_default());

            match staged.collections.get(collection).and_then(|staged_docs| staged_docs.get(id)) {
                Some(document) => {
                    docs.insert(*id, document.clone());
                }
                None => {
                    docs.remove(id);
                }
            }
        }

        for (collection, id) in staged.originals.keys() {
            let unique = state.indexes.get(collection).map_or(&[][..], |indexes| indexes.unique.as_slice());

            if let Some(docs) = merged.get(collection.as_str()) {
                if let Some(document) = docs.get(id) {
                    check_unique(collection, unique, docs, document)?;
                }
            }
        }

        let written = staged.originals.len();
        for (collection, docs) in merged {
            state.collections.insert(collection.to_string(), docs);
        }

        debug!(written, "writes published");

        Ok(())
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn start_transaction(&mut self) -> CrudResult<()> {
        if self.transaction.is_some() {
            return Err(CrudError::Transaction("transaction already in progress".to_string()));
        }

        self.transaction = Some(Staged::default());
        Ok(())
    }

    async fn commit_transaction(&mut self) -> CrudResult<()> {
        match self.transaction.take() {
            Some(staged) => self.publish(staged).await,
            None => Err(CrudError::Transaction("no transaction in progress".to_string())),
        }
    }

    async fn abort_transaction(&mut self) -> CrudResult<()> {
        self.transaction = None;
        Ok(())
    }

    async fn find_one(&mut self, collection: &str, filter: &Expr) -> CrudResult<Option<Document>> {
        self.run(collection, |staged, indexes| {
            let id = staged.first_match(collection, filter, indexes)?;
            Ok(id.and_then(|id| staged.docs(collection).get(&id).cloned()))
        })
        .await
    }

    async fn find_many(&mut self, collection: &str, filter: &Expr) -> CrudResult<Vec<Document>> {
        self.run(collection, |staged, indexes| staged.find_many(collection, filter, indexes))
            .await
    }

    async fn count(&mut self, collection: &str, filter: &Expr) -> CrudResult<u64> {
        self.run(collection, |staged, indexes| {
            Ok(staged.find_many(collection, filter, indexes)?.len() as u64)
        })
        .await
    }

    async fn insert_one(&mut self, collection: &str, document: Document) -> CrudResult<ObjectId> {
        self.run(collection, |staged, indexes| staged.insert_one(collection, document, indexes))
            .await
    }

    async fn find_one_and_update(
        &mut self,
        collection: &str,
        filter: &Expr,
        update: &UpdateSpec,
        returned: ReturnDocument,
    ) -> CrudResult<Option<Document>> {
        self.run(collection, |staged, indexes| {
            staged.find_one_and_update(collection, filter, update, returned, indexes)
        })
        .await
    }

    async fn find_one_and_delete(&mut self, collection: &str, filter: &Expr) -> CrudResult<Option<Document>> {
        self.run(collection, |staged, indexes| staged.find_one_and_delete(collection, filter, indexes))
            .await
    }

    async fn delete_many(&mut self, collection: &str, filter: &Expr) -> CrudResult<u64> {
        self.run(collection, |staged, indexes| staged.delete_many(collection, filter, indexes))
            .await
    }
}

fn select<'a>(docs: &'a Collection, filter: Option<&Expr>, text_fields: &[String]) -> CrudResult<Vec<&'a Document>> {
    let mut selected = Vec::new();

    for document in docs.values() {
        if DocumentEvaluator::matches(document, filter, text_fields)? {
            selected.push(document);
        }
    }

    Ok(selected)
}

/// Fails with [`CrudError::Conflict`] when another document of `docs` has the same values as
/// `candidate` for any of the `unique` field sets.
fn check_unique(collection: &str, unique: &[Vec<String>], docs: &Collection, candidate: &Document) -> CrudResult<()> {
    let id = candidate.get_object_id(ID_FIELD).ok();

    for fields in unique {
        let Some(key) = fields
            .iter()
            .map(|field| lookup(candidate, field))
            .collect::<Option<Vec<_>>>()
        else {
            continue;
        };

        let clash = docs.iter().any(|(other_id, other)| {
            Some(*other_id) != id && fields.iter().zip(&key).all(|(field, value)| lookup(other, field) == Some(*value))
        });

        if clash {
            return Err(CrudError::Conflict(format!(
                "duplicate value for {} in {collection}",
                fields.join(", "),
            )));
        }
    }

    Ok(())
}

fn project(document: &Document, projection: &Projection) -> CrudResult<Document> {
    match projection {
        Projection::Exclude(fields) => {
            let mut projected = document.clone();
            for field in fields {
                remove_path(&mut projected, field);
            }
            Ok(projected)
        }
        Projection::Include(fields) => {
            let mut projected = Document::new();
            for field in fields {
                if let Some(value) = lookup(document, field) {
                    set_path(&mut projected, field, value.clone())?;
                }
            }
            Ok(projected)
        }
    }
}

fn apply_update(document: &mut Document, update: &UpdateSpec) -> CrudResult<()> {
    for (path, value) in &update.set {
        if path == ID_FIELD {
            return Err(CrudError::Backend(format!("{ID_FIELD} is immutable")));
        }
        set_path(document, path, value.clone())?;
    }

    for (path, value) in &update.add_to_set {
        if lookup(document, path).is_none() {
            set_path(document, path, Bson::Array(vec![]))?;
        }

        match lookup_mut(document, path) {
            Some(Bson::Array(items)) => {
                if !items.contains(value) {
                    items.push(value.clone());
                }
            }
            _ => return Err(CrudError::Backend(format!("cannot add to non-array field {path}"))),
        }
    }

    for (path, value) in &update.pull {
        match lookup_mut(document, path) {
            Some(Bson::Array(items)) => items.retain(|item| item != value),
            None => {}
            Some(_) => return Err(CrudError::Backend(format!("cannot pull from non-array field {path}"))),
        }
    }

    Ok(())
}

fn lookup_mut<'a>(document: &'a mut Document, path: &str) -> Option<&'a mut Bson> {
    let mut segments = path.split('.');
    let mut current = document.get_mut(segments.next()?)?;

    for segment in segments {
        current = current.as_document_mut()?.get_mut(segment)?;
    }

    Some(current)
}

fn set_path(document: &mut Document, path: &str, value: Bson) -> CrudResult<()> {
    let Some((head, rest)) = path.split_once('.') else {
        document.insert(path, value);
        return Ok(());
    };

    if !document.contains_key(head) {
        document.insert(head, Document::new());
    }

    match document.get_mut(head) {
        Some(Bson::Document(inner)) => set_path(inner, rest, value),
        _ => Err(CrudError::Backend(format!("cannot set {path}: {head} is not a document"))),
    }
}

fn remove_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// # Example
///
/// ```ignore
/// use doccrud_memory::InMemoryStore;
/// use doccrud::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder().build().await?;
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> CrudResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}
