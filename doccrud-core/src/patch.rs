//! Partial-update patches.
//!
//! Update forms carry each updatable field as an `Option`. A form implements [`UpdateForm`] by
//! listing its fields explicitly; only the ones that are `Some` end up in the patch, so a
//! missing field is never overwritten or nulled.
//!
//! ```ignore
//! impl UpdateForm for PlaceUpdate {
//!     fn patch(&self) -> CrudResult<Patch> {
//!         Patch::new()
//!             .set_opt("title", &self.title)?
//!             .set_opt("location.lat", &self.location_lat)
//!     }
//! }
//! ```

use bson::{Bson, Document, ser::serialize_to_bson};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{backend::UpdateSpec, error::CrudResult};

/// Field the engine stamps on every update.
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// The set of fields an update writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    set: Document,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `value` to `field` unconditionally.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }

    /// Writes `value` to `field` when it is present.
    ///
    /// # Errors
    ///
    /// Returns a serialization error when the value cannot be represented as BSON.
    pub fn set_opt<T: Serialize>(mut self, field: impl Into<String>, value: &Option<T>) -> CrudResult<Self> {
        if let Some(value) = value {
            self.set.insert(field.into(), serialize_to_bson(value)?);
        }

        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.set.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&Bson> {
        self.set.get(field)
    }

    /// The store update for this patch, stamped with `updatedAt = now`.
    pub fn into_update(self, now: DateTime<Utc>) -> UpdateSpec {
        UpdateSpec::set_all(self.set).set(UPDATED_AT_FIELD, bson::DateTime::from_chrono(now))
    }
}

/// An update form that knows which of its fields were supplied.
pub trait UpdateForm {
    /// Builds the patch for the supplied fields only.
    fn patch(&self) -> CrudResult<Patch>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Form {
        title: Option<String>,
        lat: Option<f64>,
        tags: Option<Vec<String>>,
    }

    impl UpdateForm for Form {
        fn patch(&self) -> CrudResult<Patch> {
            Patch::new()
                .set_opt("title", &self.title)?
                .set_opt("location.lat", &self.lat)?
                .set_opt("tags", &self.tags)
        }
    }

    #[test]
    fn absent_fields_are_left_out() -> anyhow::Result<()> {
        let form = Form { title: None, lat: Some(48.85), tags: None };

        let patch = form.patch()?;

        assert!(!patch.contains("title"));
        assert_eq!(patch.get("location.lat"), Some(&Bson::Double(48.85)));
        Ok(())
    }

    #[test]
    fn update_always_stamps_updated_at() -> anyhow::Result<()> {
        let now = Utc::now();
        let form = Form { title: None, lat: None, tags: Some(vec![]) };

        let update = form.patch()?.into_update(now);

        assert_eq!(update.set.get("tags"), Some(&Bson::Array(vec![])));
        assert_eq!(update.set.get(UPDATED_AT_FIELD), Some(&Bson::DateTime(bson::DateTime::from_chrono(now))));
        Ok(())
    }
}
