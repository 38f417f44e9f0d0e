//! Stored document traits and conversions.
//!
//! Entities describe their storage shape with a serde type implementing [`Document`]; the
//! engine moves them in and out of the store as raw BSON documents through [`DocumentExt`].

use bson::{Bson, Document as BsonDocument, de::deserialize_from_document, oid::ObjectId, ser::serialize_to_document};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    error::{CrudError, CrudResult},
    planner::{ID_FIELD, LOGICAL_ID_FIELD},
};

/// Core trait for the storage representation of an entity.
///
/// # Example
///
/// ```ignore
/// use bson::oid::ObjectId;
/// use doccrud::document::Document;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct UserDb {
///     #[serde(rename = "_id")]
///     pub id: ObjectId,
///     pub name: String,
/// }
///
/// impl Document for UserDb {
///     fn id(&self) -> ObjectId { self.id }
///     fn collection_name() -> &'static str { "users" }
/// }
/// ```
pub trait Document: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// Returns this document's native identifier.
    fn id(&self) -> ObjectId;

    /// Returns the name of the collection this document belongs to.
    fn collection_name() -> &'static str;
}

/// Conversion helpers, implemented for every [`Document`].
pub trait DocumentExt: Document {
    /// Converts this value to a raw document for storage.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    fn to_document(&self) -> CrudResult<BsonDocument>;

    /// Decodes a raw stored document.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored document does not match this type.
    fn from_document(document: BsonDocument) -> CrudResult<Self>;
}

impl<D: Document> DocumentExt for D {
    fn to_document(&self) -> CrudResult<BsonDocument> {
        Ok(serialize_to_document(self)?)
    }

    fn from_document(document: BsonDocument) -> CrudResult<Self> {
        Ok(deserialize_from_document(document)?)
    }
}

/// Reads the native identifier of a raw document.
pub fn document_id(document: &BsonDocument) -> CrudResult<ObjectId> {
    document
        .get_object_id(ID_FIELD)
        .map_err(|_| CrudError::Serialization(format!("document has no {ID_FIELD}")))
}

/// Rewrites a raw document for output: the native key becomes `id` and every identifier value
/// becomes its hex string.
pub fn externalize(document: BsonDocument) -> BsonDocument {
    document
        .into_iter()
        .map(|(key, value)| {
            let key = if key == ID_FIELD { LOGICAL_ID_FIELD.to_string() } else { key };
            (key, externalize_value(value))
        })
        .collect()
}

fn externalize_value(value: Bson) -> Bson {
    match value {
        Bson::ObjectId(id) => Bson::String(id.to_hex()),
        Bson::Array(items) => Bson::Array(items.into_iter().map(externalize_value).collect()),
        Bson::Document(document) => Bson::Document(
            document.into_iter().map(|(k, v)| (k, externalize_value(v))).collect(),
        ),
        other => other,
    }
}
