use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{
    ObjectStore,
    PutPayload,
    aws::{AmazonS3, AmazonS3Builder},
    path::Path as ObjectPath,
    signer::Signer,
};
use thiserror::Error;
use tokio::{sync::RwLock, time::Duration};

/// The three buckets backing a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteBucket {
    /// Auth material snapshots.
    Sessions,
    /// Outbound media attachments.
    Media,
    /// Reserved.
    Backups,
}

impl RemoteBucket {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sessions => "sessions",
            Self::Media => "media",
            Self::Backups => "backups",
        }
    }
}

/// Errors from remote object-store operations.
#[derive(Debug, Error)]
pub enum RemoteStoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("object store error: {0}")]
    Backend(#[from] object_store::Error),
    #[error("invalid object store configuration: {0}")]
    Config(String),
}

/// S3-compatible object storage used for auth snapshots and media.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn put(
        &self,
        bucket: RemoteBucket,
        key: &str,
        bytes: Bytes,
    ) -> Result<(), RemoteStoreError>;

    async fn get(&self, bucket: RemoteBucket, key: &str) -> Result<Bytes, RemoteStoreError>;

    /// Lists object keys under a prefix.
    async fn list(&self, bucket: RemoteBucket, prefix: &str)
    -> Result<Vec<String>, RemoteStoreError>;

    async fn delete(&self, bucket: RemoteBucket, key: &str) -> Result<(), RemoteStoreError>;

    /// Returns a presigned GET URL for an existing object.
    async fn presign_get(
        &self,
        bucket: RemoteBucket,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, RemoteStoreError>;
}

/// Connection settings for the S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct RemoteStoreConfig {
    pub endpoint: String,
    pub port: u16,
    pub use_ssl: bool,
    pub access_key: String,
    pub secret_key: String,
    pub bucket_sessions: String,
    pub bucket_media: String,
    pub bucket_backups: String,
}

/// [`RemoteStore`] over an S3-compatible endpoint (MinIO in deployments).
pub struct S3RemoteStore {
    sessions: AmazonS3,
    media: AmazonS3,
    backups: AmazonS3,
}

impl S3RemoteStore {
    pub fn connect(config: &RemoteStoreConfig) -> Result<Self, RemoteStoreError> {
        let scheme = if config.use_ssl { "https" } else { "http" };
        let endpoint = format!("{scheme}://{}:{}", config.endpoint, config.port);

        let build = |bucket: &str| -> Result<AmazonS3, RemoteStoreError> {
            AmazonS3Builder::new()
                .with_endpoint(endpoint.clone())
                .with_allow_http(!config.use_ssl)
                .with_access_key_id(config.access_key.clone())
                .with_secret_access_key(config.secret_key.clone())
                .with_bucket_name(bucket.to_owned())
                .with_region("us-east-1")
                .with_virtual_hosted_style_request(false)
                .build()
                .map_err(RemoteStoreError::from)
        };

        Ok(Self {
            sessions: build(&config.bucket_sessions)?,
            media: build(&config.bucket_media)?,
            backups: build(&config.bucket_backups)?,
        })
    }

    fn store(&self, bucket: RemoteBucket) -> &AmazonS3 {
        match bucket {
            RemoteBucket::Sessions => &self.sessions,
            RemoteBucket::Media => &self.media,
            RemoteBucket::Backups => &self.backups,
        }
    }
}

#[async_trait]
impl RemoteStore for S3RemoteStore {
    async fn put(
        &self,
        bucket: RemoteBucket,
        key: &str,
        bytes: Bytes,
    ) -> Result<(), RemoteStoreError> {
        let path = ObjectPath::from(key);
        self.store(bucket).put(&path, PutPayload::from(bytes)).await?;
        Ok(())
    }

    async fn get(&self, bucket: RemoteBucket, key: &str) -> Result<Bytes, RemoteStoreError> {
        let path = ObjectPath::from(key);
        let result = self.store(bucket).get(&path).await.map_err(|error| {
            if matches!(error, object_store::Error::NotFound { .. }) {
                RemoteStoreError::NotFound(key.to_owned())
            } else {
                RemoteStoreError::Backend(error)
            }
        })?;

        Ok(result.bytes().await?)
    }

    async fn list(
        &self,
        bucket: RemoteBucket,
        prefix: &str,
    ) -> Result<Vec<String>, RemoteStoreError> {
        let prefix = ObjectPath::from(prefix);
        let objects: Vec<_> = self
            .store(bucket)
            .list(Some(&prefix))
            .try_collect()
            .await?;

        Ok(objects
            .into_iter()
            .map(|meta| meta.location.to_string())
            .collect())
    }

    async fn delete(&self, bucket: RemoteBucket, key: &str) -> Result<(), RemoteStoreError> {
        let path = ObjectPath::from(key);
        self.store(bucket).delete(&path).await?;
        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: RemoteBucket,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, RemoteStoreError> {
        let path = ObjectPath::from(key);
        let url = self
            .store(bucket)
            .signed_url(http::Method::GET, &path, expires_in)
            .await?;
        Ok(url.to_string())
    }
}

/// In-memory [`RemoteStore`] used by tests and standalone runs.
#[derive(Default)]
pub struct InMemoryRemoteStore {
    objects: RwLock<HashMap<RemoteBucket, HashMap<String, Bytes>>>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the number of stored objects across all buckets.
    pub async fn object_count(&self) -> usize {
        self.objects.read().await.values().map(HashMap::len).sum()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn put(
        &self,
        bucket: RemoteBucket,
        key: &str,
        bytes: Bytes,
    ) -> Result<(), RemoteStoreError> {
        let mut guard = self.objects.write().await;
        guard.entry(bucket).or_default().insert(key.to_owned(), bytes);
        Ok(())
    }

    async fn get(&self, bucket: RemoteBucket, key: &str) -> Result<Bytes, RemoteStoreError> {
        let guard = self.objects.read().await;
        guard
            .get(&bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
            .ok_or_else(|| RemoteStoreError::NotFound(key.to_owned()))
    }

    async fn list(
        &self,
        bucket: RemoteBucket,
        prefix: &str,
    ) -> Result<Vec<String>, RemoteStoreError> {
        let guard = self.objects.read().await;
        let Some(objects) = guard.get(&bucket) else {
            return Ok(Vec::new());
        };

        let mut keys: Vec<String> = objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, bucket: RemoteBucket, key: &str) -> Result<(), RemoteStoreError> {
        let mut guard = self.objects.write().await;
        if let Some(objects) = guard.get_mut(&bucket) {
            objects.remove(key);
        }
        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: RemoteBucket,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, RemoteStoreError> {
        Ok(format!(
            "memory://{}/{key}?expires={}",
            bucket.as_str(),
            expires_in.as_secs()
        ))
    }
}
