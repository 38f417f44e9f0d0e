//! Blob store boundary.
//!
//! Entities keep only a reference to uploaded binaries (images). The blob store turns
//! references into time-limited URLs for callers and removes blobs when their owning record
//! goes away.

use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;

use crate::error::CrudResult;

#[async_trait]
pub trait BlobStore: Send + Sync + Debug {
    /// Stores `bytes` under `name` and returns the stored reference.
    async fn upload(&self, bytes: Vec<u8>, name: &str) -> CrudResult<String>;

    /// Returns a URL granting read access to `reference` for `ttl`.
    async fn signed_url(&self, reference: &str, ttl: Duration) -> CrudResult<String>;

    /// Deletes `reference`, returning whether a blob was removed.
    async fn delete(&self, reference: &str) -> CrudResult<bool>;
}
