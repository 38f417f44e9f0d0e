//! The `places` entity.
//!
//! Every place belongs to the user in its `creatorId`, and that user lists the place's id in
//! its `places` array. The hooks below keep both sides in step on create, update and delete.

use async_trait::async_trait;
use bson::{Document, oid::ObjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use doccrud_core::{
    actor::Actor,
    auth::authorize_owner,
    backend::{IndexKind, IndexSpec},
    capability::{DocumentCreator, DocumentDeleter, DocumentFetcher, DocumentReader, DocumentUpdater},
    crud::parse_id,
    document::{Document as StoredDocument, DocumentExt, document_id},
    error::{CrudError, CrudResult, FieldErrors},
    filter::{FieldSpec, FieldType, Rule},
    find::QuerySchema,
    patch::{Patch, UpdateForm},
    planner::FetchPolicy,
    query::Sort,
    store::DocumentStore,
    transaction::Transaction,
};

use super::{
    IMAGE_FIELD, Upload, externalize_with_image, remove_blob, require, signed_image_url, upload_image,
    user::{PLACES_FIELD, USERS},
};

pub(crate) const PLACES: &str = "places";
pub(crate) const CREATOR_FIELD: &str = "creatorId";

/// Minimum length of titles and descriptions.
const MIN_TEXT_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

impl Location {
    fn check(&self, errors: &mut FieldErrors) {
        require(errors, (-90.0..=90.0).contains(&self.lat), "locationLat", "latitude must be between -90 and 90");
        require(errors, (-180.0..=180.0).contains(&self.lng), "locationLng", "longitude must be between -180 and 180");
    }
}

/// Storage representation of a place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceDb {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub title: String,
    pub description: String,
    pub address: String,
    pub location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Search embedding; never returned to callers.
    #[serde(default)]
    pub embedding: Vec<f64>,
    pub creator_id: ObjectId,
    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

impl StoredDocument for PlaceDb {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn collection_name() -> &'static str {
        PLACES
    }
}

/// A place as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceRead {
    pub id: String,
    pub title: String,
    pub description: String,
    pub address: String,
    pub location: Location,
    pub image_url: Option<String>,
    pub creator_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload creating a place.
#[derive(Debug, Clone)]
pub struct PlacePost {
    pub title: String,
    pub description: String,
    pub address: String,
    pub location: Location,
    /// Hex id of the owning user.
    pub creator_id: String,
    pub image: Option<Upload>,
}

/// Payload updating a place. Absent fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct PlacePut {
    pub title: Option<String>,
    pub description: Option<String>,
    pub address: Option<String>,
    pub location_lat: Option<f64>,
    pub location_lng: Option<f64>,
    /// Hex id of the new owner.
    pub creator_id: Option<String>,
}

/// A validated place creation.
#[derive(Debug, Clone)]
pub struct PlaceForm {
    title: String,
    description: String,
    address: String,
    location: Location,
    creator_id: ObjectId,
    image_url: Option<String>,
}

/// A validated place update.
#[derive(Debug, Clone, Default)]
pub struct PlaceUpdate {
    title: Option<String>,
    description: Option<String>,
    address: Option<String>,
    location_lat: Option<f64>,
    location_lng: Option<f64>,
    creator_id: Option<ObjectId>,
}

impl UpdateForm for PlaceUpdate {
    fn patch(&self) -> CrudResult<Patch> {
        Patch::new()
            .set_opt("title", &self.title)?
            .set_opt("description", &self.description)?
            .set_opt("address", &self.address)?
            .set_opt("location.lat", &self.location_lat)?
            .set_opt("location.lng", &self.location_lng)?
            .set_opt(CREATOR_FIELD, &self.creator_id)
    }
}

fn check_min_len(errors: &mut FieldErrors, field: &str, value: &str) {
    if let Some(message) = Rule::MinLen(MIN_TEXT_LEN).check(field, &value.trim().into()) {
        errors.push(field, message);
    }
}

fn check_text(errors: &mut FieldErrors, title: &str, description: &str, address: &str) {
    check_min_len(errors, "title", title);
    check_min_len(errors, "description", description);
    require(errors, !address.trim().is_empty(), "address", "address must not be empty");
}

fn creator_of(raw: &Document) -> CrudResult<ObjectId> {
    raw.get_object_id(CREATOR_FIELD)
        .map_err(|_| CrudError::Serialization(format!("place has no {CREATOR_FIELD}")))
}

/// Adapter for the `places` collection.
#[derive(Debug, Clone)]
pub struct PlaceAdapter {
    store: DocumentStore,
}

impl PlaceAdapter {
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    /// Indexes the adapter relies on: creator lookups and text search over title and
    /// description.
    pub fn indexes() -> Vec<IndexSpec> {
        vec![
            IndexSpec::new(PLACES, [CREATOR_FIELD], IndexKind::Ascending),
            IndexSpec::new(PLACES, ["title", "description"], IndexKind::Text),
        ]
    }
}

#[async_trait]
impl DocumentReader for PlaceAdapter {
    type Read = PlaceRead;

    fn store(&self) -> &DocumentStore {
        &self.store
    }

    fn collection_name(&self) -> &'static str {
        PLACES
    }

    async fn post_process(&self, raw: Document) -> CrudResult<PlaceRead> {
        let place = PlaceDb::from_document(raw)?;
        let image_url = signed_image_url(&self.store, place.image_url.as_deref()).await?;

        Ok(PlaceRead {
            id: place.id.to_hex(),
            title: place.title,
            description: place.description,
            address: place.address,
            location: place.location,
            image_url,
            creator_id: place.creator_id.to_hex(),
            created_at: place.created_at.to_chrono(),
            updated_at: place.updated_at.to_chrono(),
        })
    }

    async fn post_process_raw(&self, raw: Document) -> CrudResult<Document> {
        externalize_with_image(&self.store, raw).await
    }

    fn owner_of(&self, raw: &Document) -> CrudResult<ObjectId> {
        creator_of(raw)
    }
}

impl FetchPolicy for PlaceAdapter {
    fn default_sort(&self) -> Sort {
        Sort::desc("createdAt")
    }

    fn field_mapping(&self) -> &'static [(&'static str, &'static str)] {
        &[("locationLat", "location.lat"), ("locationLng", "location.lng")]
    }

    fn secret_fields(&self) -> &'static [&'static str] {
        &["embedding"]
    }

    fn id_fields(&self) -> &'static [&'static str] {
        &[CREATOR_FIELD]
    }
}

impl DocumentFetcher for PlaceAdapter {
    fn query_schema(&self) -> QuerySchema {
        QuerySchema::new()
            .filter(FieldSpec::new("id", FieldType::String).rule(Rule::Len(24)).rule(Rule::Hexadecimal))
            .filter(FieldSpec::new("title", FieldType::String).indexed().rule(Rule::MinLen(MIN_TEXT_LEN)))
            .filter(FieldSpec::new("description", FieldType::String).indexed().rule(Rule::MinLen(MIN_TEXT_LEN)))
            .filter(FieldSpec::new("address", FieldType::String))
            .filter(FieldSpec::new(CREATOR_FIELD, FieldType::String).rule(Rule::Len(24)).rule(Rule::Hexadecimal))
            .filter(FieldSpec::new("locationLat", FieldType::Float))
            .filter(FieldSpec::new("locationLng", FieldType::Float))
            .sortable(["createdAt", "updatedAt", "title", "description", "address"])
            .selectable([
                "id",
                "title",
                "description",
                "address",
                "location",
                "locationLat",
                "locationLng",
                "imageUrl",
                CREATOR_FIELD,
                "createdAt",
                "updatedAt",
            ])
    }

    fn ownership_field(&self) -> &'static str {
        CREATOR_FIELD
    }
}

#[async_trait]
impl DocumentCreator for PlaceAdapter {
    type Post = PlacePost;
    type Form = PlaceForm;
    type Db = PlaceDb;

    async fn to_create_form(&self, post: PlacePost) -> CrudResult<PlaceForm> {
        let mut errors = FieldErrors::new();
        check_text(&mut errors, &post.title, &post.description, &post.address);
        post.location.check(&mut errors);
        let creator_id = ObjectId::parse_str(&post.creator_id);
        require(&mut errors, creator_id.is_ok(), CREATOR_FIELD, "creatorId must be a valid object id");
        errors.into_result()?;

        let creator_id = parse_id(&post.creator_id)?;
        let image_url = upload_image(&self.store, post.image).await?;

        Ok(PlaceForm {
            title: post.title,
            description: post.description,
            address: post.address,
            location: post.location,
            creator_id,
            image_url,
        })
    }

    fn to_db_doc(&self, form: PlaceForm) -> CrudResult<PlaceDb> {
        let now = bson::DateTime::now();

        Ok(PlaceDb {
            id: ObjectId::new(),
            title: form.title,
            description: form.description,
            address: form.address,
            location: form.location,
            image_url: form.image_url,
            embedding: Vec::new(),
            creator_id: form.creator_id,
            created_at: now,
            updated_at: now,
        })
    }

    /// Members may only create places for themselves. A malformed `creatorId` is left to
    /// [`to_create_form`](DocumentCreator::to_create_form), which reports it with the other
    /// invalid fields and aborts the creation.
    fn auth_create(&self, actor: &Actor, post: &PlacePost) -> CrudResult<()> {
        match ObjectId::parse_str(&post.creator_id) {
            Ok(creator) => authorize_owner(actor, creator, USERS, creator),
            Err(_) => Ok(()),
        }
    }

    async fn pre_create(&self, tx: &mut Transaction<'_>, doc: &PlaceDb) -> CrudResult<()> {
        tx.collection(USERS).require(doc.creator_id).await
    }

    async fn post_create(&self, tx: &mut Transaction<'_>, doc: &PlaceDb) -> CrudResult<()> {
        tx.collection(USERS).add_to_set(doc.creator_id, PLACES_FIELD, doc.id).await
    }

    fn uploaded_blob<'d>(&self, doc: &'d PlaceDb) -> Option<&'d str> {
        doc.image_url.as_deref()
    }
}

#[async_trait]
impl DocumentUpdater for PlaceAdapter {
    type Put = PlacePut;
    type Form = PlaceUpdate;

    async fn to_update_form(&self, put: PlacePut) -> CrudResult<PlaceUpdate> {
        let mut errors = FieldErrors::new();
        if let Some(title) = &put.title {
            check_min_len(&mut errors, "title", title);
        }
        if let Some(description) = &put.description {
            check_min_len(&mut errors, "description", description);
        }
        if let Some(address) = &put.address {
            require(&mut errors, !address.trim().is_empty(), "address", "address must not be empty");
        }
        if let Some(lat) = put.location_lat {
            require(&mut errors, (-90.0..=90.0).contains(&lat), "locationLat", "latitude must be between -90 and 90");
        }
        if let Some(lng) = put.location_lng {
            require(&mut errors, (-180.0..=180.0).contains(&lng), "locationLng", "longitude must be between -180 and 180");
        }
        errors.into_result()?;

        Ok(PlaceUpdate {
            title: put.title,
            description: put.description,
            address: put.address,
            location_lat: put.location_lat,
            location_lng: put.location_lng,
            creator_id: put.creator_id.as_deref().map(parse_id).transpose()?,
        })
    }

    /// Handing a place to another user requires being that user, or an admin.
    fn auth_update(&self, actor: &Actor, before: &Document, form: &PlaceUpdate) -> CrudResult<()> {
        match form.creator_id {
            Some(creator) if creator != creator_of(before)? => authorize_owner(actor, creator, USERS, creator),
            _ => Ok(()),
        }
    }

    async fn pre_update(&self, tx: &mut Transaction<'_>, before: &Document, form: &PlaceUpdate) -> CrudResult<()> {
        match form.creator_id {
            Some(creator) if creator != creator_of(before)? => tx.collection(USERS).require(creator).await,
            _ => Ok(()),
        }
    }

    /// Moves the place between the creators' `places` lists when ownership changed.
    async fn post_update(&self, tx: &mut Transaction<'_>, before: &Document, after: &Document) -> CrudResult<()> {
        let (old, new) = (creator_of(before)?, creator_of(after)?);

        if old != new {
            let place = document_id(after)?;
            tx.collection(USERS).pull(old, PLACES_FIELD, place).await?;
            tx.collection(USERS).add_to_set(new, PLACES_FIELD, place).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl DocumentDeleter for PlaceAdapter {
    async fn post_delete(&self, tx: &mut Transaction<'_>, deleted: &Document) -> CrudResult<()> {
        let place = document_id(deleted)?;
        tx.collection(USERS).pull(creator_of(deleted)?, PLACES_FIELD, place).await?;

        if let Ok(reference) = deleted.get_str(IMAGE_FIELD) {
            remove_blob(&self.store, reference).await;
        }

        Ok(())
    }
}
