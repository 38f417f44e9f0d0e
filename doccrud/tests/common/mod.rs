#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use doccrud::{
    entities::{Location, PlaceAdapter, PlacePost, PlaceRead, UserAdapter, UserPost, UserRead},
    memory::{InMemoryBlobStore, InMemoryStore},
    prelude::*,
};

pub const DESCRIPTION: &str = "A place worth a detour on any trip";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Blob store that, once armed, fails to sign references starting with `broken`.
#[derive(Debug, Clone)]
pub struct FlakyBlobStore {
    pub inner: InMemoryBlobStore,
    armed: Arc<AtomicBool>,
}

impl FlakyBlobStore {
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn upload(&self, bytes: Vec<u8>, name: &str) -> CrudResult<String> {
        self.inner.upload(bytes, name).await
    }

    async fn signed_url(&self, reference: &str, ttl: Duration) -> CrudResult<String> {
        if self.armed.load(Ordering::SeqCst) && reference.starts_with("broken") {
            return Err(CrudError::Blob(format!("cannot sign {reference}")));
        }

        self.inner.signed_url(reference, ttl).await
    }

    async fn delete(&self, reference: &str) -> CrudResult<bool> {
        self.inner.delete(reference).await
    }
}

pub struct Fixture {
    pub store: DocumentStore,
    pub blobs: InMemoryBlobStore,
    pub flaky: FlakyBlobStore,
    pub users: UserAdapter,
    pub places: PlaceAdapter,
    pub ctx: Context,
}

impl Fixture {
    pub async fn new() -> anyhow::Result<Self> {
        Self::with_config(EngineConfig::default()).await
    }

    pub async fn with_config(config: EngineConfig) -> anyhow::Result<Self> {
        init_tracing();

        let blobs = InMemoryBlobStore::new("images");
        let flaky = FlakyBlobStore { inner: blobs.clone(), armed: Arc::default() };
        let backend = InMemoryStore::builder().build().await?;
        let store = DocumentStore::new(Arc::new(backend), Arc::new(flaky.clone()), config);

        store.ensure_indexes(&UserAdapter::indexes()).await?;
        store.ensure_indexes(&PlaceAdapter::indexes()).await?;

        Ok(Self {
            users: UserAdapter::new(store.clone()),
            places: PlaceAdapter::new(store.clone()),
            store,
            blobs,
            flaky,
            ctx: Context::background(),
        })
    }

    pub async fn user(&self, name: &str, is_admin: bool) -> anyhow::Result<(UserRead, Actor)> {
        let user = crud::create(&self.users, &self.ctx, UserPost {
            name: name.to_string(),
            email: format!("{name}@example.com"),
            password: "s3cret-password".to_string(),
            is_admin,
            image: None,
        })
        .await?;
        let actor = Actor::new(crud::parse_id(&user.id)?, is_admin);

        Ok((user, actor))
    }

    pub async fn place(&self, actor: &Actor, title: &str) -> anyhow::Result<PlaceRead> {
        Ok(crud::user_create(&self.places, &self.ctx, Some(actor), place_post(actor, title)).await?)
    }

    pub async fn user_record(&self, id: &str) -> anyhow::Result<UserRead> {
        Ok(crud::get_by_id(&self.users, &self.ctx, id).await?)
    }

    pub async fn count(&self, collection: &str) -> anyhow::Result<u64> {
        Ok(self.store.backend().count(collection, None).await?)
    }
}

pub fn place_post(actor: &Actor, title: &str) -> PlacePost {
    PlacePost {
        title: title.to_string(),
        description: DESCRIPTION.to_string(),
        address: "20 W 34th St, New York, NY 10001".to_string(),
        location: Location { lat: 40.7484405, lng: -73.9878584 },
        creator_id: actor.id.to_hex(),
        image: None,
    }
}
