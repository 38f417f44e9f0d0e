//! The authenticated caller as seen by the engine.

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// An authenticated caller, supplied by the transport layer.
///
/// Anonymous calls pass `None` wherever an `Option<&Actor>` is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: ObjectId,
    pub is_admin: bool,
}

impl Actor {
    pub fn new(id: ObjectId, is_admin: bool) -> Self {
        Self { id, is_admin }
    }

    pub fn admin(id: ObjectId) -> Self {
        Self::new(id, true)
    }

    pub fn member(id: ObjectId) -> Self {
        Self::new(id, false)
    }
}
