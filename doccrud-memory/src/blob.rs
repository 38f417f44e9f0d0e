//! In-memory blob store.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use mea::rwlock::RwLock;

use doccrud_core::{
    blob::BlobStore,
    error::{CrudError, CrudResult},
};

/// Keeps uploaded blobs in memory and hands out `memory://` URLs for them.
///
/// Clones share the same blobs.
#[derive(Debug, Clone)]
pub struct InMemoryBlobStore {
    bucket: String,
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self { bucket: bucket.into(), blobs: Arc::default() }
    }

    pub async fn contains(&self, reference: &str) -> bool {
        self.blobs.read().await.contains_key(reference)
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn upload(&self, bytes: Vec<u8>, name: &str) -> CrudResult<String> {
        let mut blobs = self.blobs.write().await;

        if blobs.contains_key(name) {
            return Err(CrudError::Blob(format!("blob {name} already exists in {}", self.bucket)));
        }

        blobs.insert(name.to_string(), bytes);
        Ok(name.to_string())
    }

    async fn signed_url(&self, reference: &str, ttl: Duration) -> CrudResult<String> {
        if !self.contains(reference).await {
            return Err(CrudError::Blob(format!("no blob {reference} in {}", self.bucket)));
        }

        let ttl = chrono::Duration::from_std(ttl).map_err(|e| CrudError::Blob(e.to_string()))?;
        let expires = (Utc::now() + ttl).timestamp();

        Ok(format!("memory://{}/{reference}?expires={expires}", self.bucket))
    }

    async fn delete(&self, reference: &str) -> CrudResult<bool> {
        Ok(self.blobs.write().await.remove(reference).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signs_only_existing_blobs() -> anyhow::Result<()> {
        let blobs = InMemoryBlobStore::new("uploads");
        let reference = blobs.upload(vec![1, 2, 3], "tower_1.png").await?;

        let url = blobs.signed_url(&reference, Duration::from_secs(60)).await?;
        assert!(url.starts_with("memory://uploads/tower_1.png?expires="));

        assert!(blobs.delete(&reference).await?);
        assert!(!blobs.delete(&reference).await?);
        assert!(matches!(blobs.signed_url(&reference, Duration::from_secs(60)).await, Err(CrudError::Blob(_))));
        Ok(())
    }
}
