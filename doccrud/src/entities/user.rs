//! The `users` entity.
//!
//! Users own places and their own account. Passwords are stored as Argon2 hashes and never
//! returned; name and email are unique. Deleting a user deletes every place they created.

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use doccrud_core::{
    actor::Actor,
    auth::require_admin,
    backend::{IndexKind, IndexSpec},
    capability::{DocumentCreator, DocumentDeleter, DocumentFetcher, DocumentReader, DocumentUpdater},
    document::{Document as StoredDocument, DocumentExt, document_id},
    error::{CrudResult, FieldErrors},
    filter::{FieldSpec, FieldType, Rule},
    find::QuerySchema,
    patch::{Patch, UpdateForm},
    planner::FetchPolicy,
    query::{Predicate, Sort},
    store::DocumentStore,
    transaction::Transaction,
};

use super::{
    IMAGE_FIELD, Upload, externalize_with_image,
    password::hash_password,
    place::{CREATOR_FIELD, PLACES},
    remove_blob, require, signed_image_url, upload_image,
};

pub(crate) const USERS: &str = "users";
/// Array of the ids of the places a user created.
pub(crate) const PLACES_FIELD: &str = "places";

const MIN_PASSWORD_LEN: usize = 6;

/// Storage representation of a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDb {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    pub email: String,
    /// Argon2 hash. Listings never project it.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    pub is_admin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub places: Vec<ObjectId>,
    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

impl StoredDocument for UserDb {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn collection_name() -> &'static str {
        USERS
    }
}

/// A user as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRead {
    pub id: String,
    pub name: String,
    pub email: String,
    pub is_admin: bool,
    /// Signed URL of the user's image.
    pub image_url: Option<String>,
    pub places: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload creating a user.
#[derive(Debug, Clone, Default)]
pub struct UserPost {
    pub name: String,
    pub email: String,
    pub password: String,
    pub is_admin: bool,
    pub image: Option<Upload>,
}

/// Payload updating a user. Absent fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct UserPut {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub is_admin: Option<bool>,
}

/// A validated user creation, password already hashed and image uploaded.
#[derive(Debug, Clone)]
pub struct UserForm {
    name: String,
    email: String,
    password_hash: String,
    is_admin: bool,
    image_url: Option<String>,
}

/// A validated user update.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    name: Option<String>,
    email: Option<String>,
    password_hash: Option<String>,
    is_admin: Option<bool>,
}

impl UpdateForm for UserUpdate {
    fn patch(&self) -> CrudResult<Patch> {
        Patch::new()
            .set_opt("name", &self.name)?
            .set_opt("email", &self.email)?
            .set_opt("password", &self.password_hash)?
            .set_opt("isAdmin", &self.is_admin)
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_string()
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn check_name(errors: &mut FieldErrors, name: &str) {
    require(errors, !name.is_empty(), "name", "name must not be empty");
}

fn check_email(errors: &mut FieldErrors, email: &str) {
    if let Some(message) = Rule::Email.check("email", &Bson::String(email.to_string())) {
        errors.push("email", message);
    }
}

fn check_password(errors: &mut FieldErrors, password: &str) {
    if let Some(message) = Rule::MinLen(MIN_PASSWORD_LEN).check("password", &Bson::String(password.to_string())) {
        errors.push("password", message);
    }
}

/// Adapter for the `users` collection.
#[derive(Debug, Clone)]
pub struct UserAdapter {
    store: DocumentStore,
}

impl UserAdapter {
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    /// Indexes the adapter relies on: unique name and email, text search on name.
    pub fn indexes() -> Vec<IndexSpec> {
        vec![
            IndexSpec::new(USERS, ["email"], IndexKind::Unique),
            IndexSpec::new(USERS, ["name"], IndexKind::Unique),
            IndexSpec::new(USERS, ["name"], IndexKind::Text),
        ]
    }

    fn to_read(&self, user: UserDb, image_url: Option<String>) -> UserRead {
        UserRead {
            id: user.id.to_hex(),
            name: user.name,
            email: user.email,
            is_admin: user.is_admin,
            image_url,
            places: user.places.iter().map(|id| id.to_hex()).collect(),
            created_at: user.created_at.to_chrono(),
            updated_at: user.updated_at.to_chrono(),
        }
    }
}

#[async_trait]
impl DocumentReader for UserAdapter {
    type Read = UserRead;

    fn store(&self) -> &DocumentStore {
        &self.store
    }

    fn collection_name(&self) -> &'static str {
        USERS
    }

    async fn post_process(&self, raw: Document) -> CrudResult<UserRead> {
        let user = UserDb::from_document(raw)?;
        let image_url = signed_image_url(&self.store, user.image_url.as_deref()).await?;

        Ok(self.to_read(user, image_url))
    }

    async fn post_process_raw(&self, raw: Document) -> CrudResult<Document> {
        externalize_with_image(&self.store, raw).await
    }

    /// Users own themselves.
    fn owner_of(&self, raw: &Document) -> CrudResult<ObjectId> {
        document_id(raw)
    }
}

impl FetchPolicy for UserAdapter {
    fn default_sort(&self) -> Sort {
        Sort::desc("createdAt")
    }

    fn secret_fields(&self) -> &'static [&'static str] {
        &["password"]
    }
}

impl DocumentFetcher for UserAdapter {
    fn query_schema(&self) -> QuerySchema {
        QuerySchema::new()
            .filter(FieldSpec::new("id", FieldType::String).rule(Rule::Len(24)).rule(Rule::Hexadecimal))
            .filter(FieldSpec::new("name", FieldType::String).indexed())
            .filter(FieldSpec::new("email", FieldType::String))
            .sortable(["createdAt", "updatedAt", "name", "email"])
            .selectable(["id", "name", "email", "isAdmin", "imageUrl", "places", "createdAt", "updatedAt"])
    }

    fn ownership_field(&self) -> &'static str {
        "id"
    }
}

#[async_trait]
impl DocumentCreator for UserAdapter {
    type Post = UserPost;
    type Form = UserForm;
    type Db = UserDb;

    async fn to_create_form(&self, post: UserPost) -> CrudResult<UserForm> {
        let (name, email) = (normalize_name(&post.name), normalize_email(&post.email));

        let mut errors = FieldErrors::new();
        check_name(&mut errors, &name);
        check_email(&mut errors, &email);
        check_password(&mut errors, &post.password);
        errors.into_result()?;

        let password_hash = hash_password(&post.password)?;
        let image_url = upload_image(&self.store, post.image).await?;

        Ok(UserForm {
            name,
            email,
            password_hash,
            is_admin: post.is_admin,
            image_url,
        })
    }

    fn to_db_doc(&self, form: UserForm) -> CrudResult<UserDb> {
        let now = bson::DateTime::now();

        Ok(UserDb {
            id: ObjectId::new(),
            name: form.name,
            email: form.email,
            password: form.password_hash,
            is_admin: form.is_admin,
            image_url: form.image_url,
            places: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    fn auth_create(&self, actor: &Actor, _post: &UserPost) -> CrudResult<()> {
        require_admin(actor, "only admins can create new users")
    }

    fn uploaded_blob<'d>(&self, doc: &'d UserDb) -> Option<&'d str> {
        doc.image_url.as_deref()
    }
}

#[async_trait]
impl DocumentUpdater for UserAdapter {
    type Put = UserPut;
    type Form = UserUpdate;

    async fn to_update_form(&self, put: UserPut) -> CrudResult<UserUpdate> {
        let name = put.name.as_deref().map(normalize_name);
        let email = put.email.as_deref().map(normalize_email);

        let mut errors = FieldErrors::new();
        if let Some(name) = &name {
            check_name(&mut errors, name);
        }
        if let Some(email) = &email {
            check_email(&mut errors, email);
        }
        if let Some(password) = &put.password {
            check_password(&mut errors, password);
        }
        errors.into_result()?;

        Ok(UserUpdate {
            name,
            email,
            password_hash: put.password.as_deref().map(hash_password).transpose()?,
            is_admin: put.is_admin,
        })
    }

    fn auth_update(&self, actor: &Actor, _before: &Document, form: &UserUpdate) -> CrudResult<()> {
        if form.is_admin.is_some() {
            require_admin(actor, "only admins can change admin rights")?;
        }

        Ok(())
    }
}

#[async_trait]
impl DocumentDeleter for UserAdapter {
    /// Deletes the user's places and best-effort removes the blobs of all of them.
    async fn post_delete(&self, tx: &mut Transaction<'_>, deleted: &Document) -> CrudResult<()> {
        let user = document_id(deleted)?;
        let owned = Predicate::eq(CREATOR_FIELD, user);

        let places = tx.collection(PLACES).find(&owned).await?;
        let removed = tx.collection(PLACES).delete_many(&owned).await?;
        debug!(%user, removed, "deleted places of user");

        let images = places
            .iter()
            .chain(std::iter::once(deleted))
            .filter_map(|document| document.get_str(IMAGE_FIELD).ok());

        for reference in images {
            remove_blob(&self.store, reference).await;
        }

        Ok(())
    }
}
