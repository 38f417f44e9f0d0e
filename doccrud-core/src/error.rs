//! Error types and result types for CRUD engine operations.
//!
//! Every fallible operation in the engine returns [`CrudResult<T>`]. The variants of
//! [`CrudError`] form the error taxonomy surfaced to callers: validation failures are
//! field-keyed so a caller can fix every problem in one round trip, while authorization and
//! lookup failures carry the collection and record id they concern.

use std::{collections::BTreeMap, fmt};

use bson::error::Error as BsonError;
use serde::Serialize;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Field-keyed validation messages.
///
/// Keys are the logical field names the caller supplied (or `page`, `size`, `sort`, `fields`
/// for query-level problems). Messages for a field keep their insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a map holding a single message for `field`.
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.push(field, message);
        errors
    }

    /// Appends a message for `field`.
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    /// Appends several messages for `field`. Does nothing when `messages` is empty.
    pub fn extend(&mut self, field: impl Into<String>, messages: impl IntoIterator<Item = String>) {
        let mut messages = messages.into_iter().peekable();

        if messages.peek().is_some() {
            self.0.entry(field.into()).or_default().extend(messages);
        }
    }

    /// Moves every message of `other` into this map.
    pub fn merge(&mut self, other: FieldErrors) {
        for (field, messages) in other.0 {
            self.extend(field, messages);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Returns `Ok(())` when no messages were collected, otherwise a [`CrudError::Validation`].
    pub fn into_result(self) -> CrudResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CrudError::Validation(self))
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .0
            .iter()
            .map(|(field, messages)| format!("{field}: {}", messages.join("; ")))
            .collect::<Vec<_>>();

        write!(f, "{}", rendered.join(", "))
    }
}

/// Aggregate of the per-record failures of one post-processing batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchError {
    /// Number of records in the batch.
    pub total: usize,
    /// Position in the batch and rendered error of every failed record.
    pub failures: Vec<(usize, String)>,
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .failures
            .iter()
            .map(|(index, message)| format!("record {index}: {message}"))
            .collect::<Vec<_>>();

        write!(
            f,
            "post processing failed for {} of {} records: {}",
            self.failures.len(),
            self.total,
            rendered.join("; "),
        )
    }
}

/// Represents all errors surfaced by the CRUD engine.
#[derive(Error, Debug)]
pub enum CrudError {
    /// Malformed filter, query or form input, keyed by field.
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),
    /// A record identifier that is not a valid native identifier.
    #[error("Invalid object ID {0}")]
    InvalidId(String),
    /// The record or a referenced record is absent.
    #[error("{collection} document {id} not found")]
    NotFound { collection: String, id: String },
    /// The actor is authenticated but may not touch the record.
    #[error("access to {collection} document {id} denied")]
    AccessDenied { collection: String, id: String },
    /// The operation requires an actor and none was supplied.
    #[error("not authenticated")]
    NotAuthenticated,
    /// The operation is restricted to administrators.
    #[error("not an admin: {0}")]
    NotAdmin(String),
    /// A uniqueness constraint was violated.
    #[error("Conflict: {0}")]
    Conflict(String),
    /// A hook or store failure inside a transaction that matched no other variant.
    #[error("Transaction failed: {0}")]
    Transaction(String),
    /// One or more records of a batch could not be enriched.
    #[error("{0}")]
    PostProcessing(BatchError),
    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
    /// The caller's deadline elapsed before the operation finished.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// Conversion between stored documents and typed values failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The backing store reported an error.
    #[error("Backend error: {0}")]
    Backend(String),
    /// The blob store reported an error.
    #[error("Blob store error: {0}")]
    Blob(String),
    /// A backend or client could not be constructed.
    #[error("Initialization error: {0}")]
    Initialization(String),
}

/// A specialized `Result` type for CRUD engine operations.
pub type CrudResult<T> = Result<T, CrudError>;

impl CrudError {
    /// Shorthand for a single-field [`CrudError::Validation`].
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        CrudError::Validation(FieldErrors::single(field, message))
    }

    pub fn not_found(collection: impl Into<String>, id: impl ToString) -> Self {
        CrudError::NotFound { collection: collection.into(), id: id.to_string() }
    }

    pub fn access_denied(collection: impl Into<String>, id: impl ToString) -> Self {
        CrudError::AccessDenied { collection: collection.into(), id: id.to_string() }
    }

    /// Whether this error is a taxonomy member that passes through a transaction abort
    /// unchanged. Anything else is reported as [`CrudError::Transaction`].
    pub fn is_known(&self) -> bool {
        matches!(
            self,
            CrudError::Validation(_)
                | CrudError::InvalidId(_)
                | CrudError::NotFound { .. }
                | CrudError::AccessDenied { .. }
                | CrudError::NotAuthenticated
                | CrudError::NotAdmin(_)
                | CrudError::Conflict(_)
                | CrudError::Transaction(_)
                | CrudError::Cancelled
                | CrudError::DeadlineExceeded
        )
    }

    /// HTTP-equivalent status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            CrudError::Validation(_) | CrudError::InvalidId(_) | CrudError::Conflict(_) => 422,
            CrudError::NotFound { .. } => 404,
            CrudError::AccessDenied { .. } | CrudError::NotAuthenticated | CrudError::NotAdmin(_) => 401,
            CrudError::Cancelled => 499,
            CrudError::DeadlineExceeded => 504,
            _ => 500,
        }
    }
}

impl From<BsonError> for CrudError {
    fn from(err: BsonError) -> Self {
        CrudError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for CrudError {
    fn from(err: SerdeJsonError) -> Self {
        CrudError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_errors_keep_message_order_per_field() {
        let mut errors = FieldErrors::new();
        errors.push("title", "first");
        errors.push("page", "bad page");
        errors.push("title", "second");

        assert_eq!(errors.get("title"), Some(&["first".to_string(), "second".to_string()][..]));
        assert_eq!(errors.fields().collect::<Vec<_>>(), vec!["page", "title"]);
    }

    #[test]
    fn empty_extend_does_not_create_key() {
        let mut errors = FieldErrors::new();
        errors.extend("title", Vec::new());

        assert!(errors.is_empty());
        assert!(errors.into_result().is_ok());
    }

    #[test]
    fn validation_serializes_as_plain_map() {
        let errors = FieldErrors::single("size", "Size value must be a positive integer");
        let json = serde_json::to_value(&errors).unwrap();

        assert_eq!(json, serde_json::json!({ "size": ["Size value must be a positive integer"] }));
    }

    #[test]
    fn unknown_errors_are_not_known() {
        assert!(CrudError::Conflict("dup".into()).is_known());
        assert!(!CrudError::Backend("boom".into()).is_known());
        assert_eq!(CrudError::access_denied("places", "abc").status_code(), 401);
        assert_eq!(CrudError::not_found("places", "abc").to_string(), "places document abc not found");
    }
}
