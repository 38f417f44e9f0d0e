//! Authorization gate.
//!
//! Access is a binary decision per record: administrators are always allowed, owners are
//! allowed on their own records, everyone else is denied with an error naming the collection
//! and record.

use bson::oid::ObjectId;

use crate::{
    actor::Actor,
    error::{CrudError, CrudResult},
};

/// Returns the actor, or [`CrudError::NotAuthenticated`] for anonymous calls.
pub fn require_actor(actor: Option<&Actor>) -> CrudResult<&Actor> {
    actor.ok_or(CrudError::NotAuthenticated)
}

/// Allows administrators and the owner of the record.
///
/// # Arguments
///
/// * `actor` - The caller
/// * `owner` - Identity the record belongs to
/// * `collection` - Collection of the record, for the error
/// * `record` - Identifier of the record, for the error
///
/// # Errors
///
/// Returns [`CrudError::AccessDenied`] when the actor is neither admin nor owner.
pub fn authorize_owner(actor: &Actor, owner: ObjectId, collection: &str, record: impl ToString) -> CrudResult<()> {
    if actor.is_admin || actor.id == owner {
        Ok(())
    } else {
        Err(CrudError::access_denied(collection, record))
    }
}

/// Allows administrators only.
///
/// # Errors
///
/// Returns [`CrudError::NotAdmin`] carrying `reason` otherwise.
pub fn require_admin(actor: &Actor, reason: &str) -> CrudResult<()> {
    if actor.is_admin {
        Ok(())
    } else {
        Err(CrudError::NotAdmin(reason.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_and_admin_pass_others_denied() {
        let owner = ObjectId::new();
        let record = ObjectId::new();

        assert!(authorize_owner(&Actor::member(owner), owner, "places", record).is_ok());
        assert!(authorize_owner(&Actor::admin(ObjectId::new()), owner, "places", record).is_ok());

        let denied = authorize_owner(&Actor::member(ObjectId::new()), owner, "places", record).unwrap_err();
        assert_eq!(denied.to_string(), format!("access to places document {record} denied"));
    }

    #[test]
    fn anonymous_is_not_authenticated() {
        assert!(matches!(require_actor(None), Err(CrudError::NotAuthenticated)));
    }
}
