//! Entity adapters shipped with doccrud.
//!
//! - [`user::UserAdapter`] - accounts, with hashed passwords and unique name and email
//! - [`place::PlaceAdapter`] - places owned by a user, kept in the user's `places` list
//!
//! Both implement every capability trait and can be passed to the functions in
//! [`crud`](crate::crud).

use std::path::Path;

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use doccrud_core::{
    document::externalize,
    error::{CrudResult, FieldErrors},
    store::DocumentStore,
};

pub mod password;
pub mod place;
pub mod user;

pub use place::{Location, PlaceAdapter, PlaceDb, PlacePost, PlacePut, PlaceRead};
pub use user::{UserAdapter, UserDb, UserPost, UserPut, UserRead};

/// Stored field holding a blob reference.
pub(crate) const IMAGE_FIELD: &str = "imageUrl";

/// A binary file attached to a creation payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upload {
    /// Original file name, used to derive the stored name.
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self { name: name.into(), bytes: bytes.into() }
    }

    /// Unique blob name: `{stem}_{uuid}.{ext}`.
    fn unique_name(&self) -> String {
        let path = Path::new(&self.name);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("upload");
        let id = Uuid::new_v4();

        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{stem}_{id}.{ext}"),
            None => format!("{stem}_{id}"),
        }
    }
}

/// Uploads `upload` when present and returns its blob reference.
pub(crate) async fn upload_image(store: &DocumentStore, upload: Option<Upload>) -> CrudResult<Option<String>> {
    match upload {
        Some(upload) => {
            let name = upload.unique_name();
            Ok(Some(store.blobs().upload(upload.bytes, &name).await?))
        }
        None => Ok(None),
    }
}

/// Turns a stored blob reference into a signed URL.
pub(crate) async fn signed_image_url(store: &DocumentStore, reference: Option<&str>) -> CrudResult<Option<String>> {
    match reference {
        Some(reference) => Ok(Some(store.blobs().signed_url(reference, store.config().signed_url_ttl).await?)),
        None => Ok(None),
    }
}

/// Deletes a blob, logging instead of failing.
pub(crate) async fn remove_blob(store: &DocumentStore, reference: &str) {
    match store.blobs().delete(reference).await {
        Ok(true) => {}
        Ok(false) => warn!(reference, "blob to remove was already gone"),
        Err(err) => warn!(reference, error = %err, "failed to remove blob"),
    }
}

/// Externalizes a projected document, signing its image reference when it was selected.
pub(crate) async fn externalize_with_image(store: &DocumentStore, mut raw: Document) -> CrudResult<Document> {
    if let Some(Bson::String(reference)) = raw.get(IMAGE_FIELD) {
        let url = store.blobs().signed_url(reference, store.config().signed_url_ttl).await?;
        raw.insert(IMAGE_FIELD, url);
    }

    Ok(externalize(raw))
}

/// Records `message` for `field` unless `valid`.
pub(crate) fn require(errors: &mut FieldErrors, valid: bool, field: &str, message: &str) {
    if !valid {
        errors.push(field, message);
    }
}
