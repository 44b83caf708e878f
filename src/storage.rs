use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info};

use crate::error::StorageError;


/// Named blobs in an external bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Uploads a local file and returns the object's url.
    async fn put(&self, local_path: &Path, key: &str) -> Result<String, StorageError>;

    async fn download(&self, key: &str, dest: &Path) -> Result<(), StorageError> {
        let data = self.get(key).await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::download(key, e))?;
        }
        tokio::fs::write(dest, data)
            .await
            .map_err(|e| StorageError::download(key, e))
    }
}


async fn bounded<T, E, F>(limit: Duration, fut: F) -> Result<T, String>
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {:?}", limit)),
    }
}


pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    timeout: Duration,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            timeout,
        }
    }

    /// Credentials and region come from the standard AWS environment chain.
    pub async fn from_env(bucket: impl Into<String>, timeout: Duration) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(aws_sdk_s3::Client::new(&config), bucket, timeout)
    }

    pub fn object_url(&self, key: &str) -> String {
        format!("https://{}.s3.amazonaws.com/{}", self.bucket, key)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let fetch = async {
            let output = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| DisplayErrorContext(e).to_string())?;
            let data = output.body.collect().await.map_err(|e| e.to_string())?;
            Ok::<_, String>(data.into_bytes().to_vec())
        };
        let data = bounded(self.timeout, fetch)
            .await
            .map_err(|reason| StorageError::download(key, reason))?;
        debug!("fetched s3://{}/{} ({} bytes)", self.bucket, key, data.len());
        Ok(data)
    }

    async fn put(&self, local_path: &Path, key: &str) -> Result<String, StorageError> {
        let upload = async {
            let body = ByteStream::from_path(local_path)
                .await
                .map_err(|e| e.to_string())?;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(body)
                .send()
                .await
                .map_err(|e| DisplayErrorContext(e).to_string())?;
            Ok::<_, String>(())
        };
        bounded(self.timeout, upload)
            .await
            .map_err(|reason| StorageError::upload(key, reason))?;
        info!("uploaded {} to s3://{}/{}", local_path.display(), self.bucket, key);
        Ok(self.object_url(key))
    }
}


/// A bucket backed by a local directory, for running without AWS.
pub struct LocalObjectStore {
    root: PathBuf,
    timeout: Duration,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            root: root.into(),
            timeout,
        }
    }

    fn object_path(&self, key: &str) -> Option<PathBuf> {
        let relative = Path::new(key);
        let plain = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        plain.then(|| self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self
            .object_path(key)
            .ok_or_else(|| StorageError::download(key, "invalid object key"))?;
        bounded(self.timeout, tokio::fs::read(&path))
            .await
            .map_err(|reason| StorageError::download(key, reason))
    }

    async fn put(&self, local_path: &Path, key: &str) -> Result<String, StorageError> {
        let path = self
            .object_path(key)
            .ok_or_else(|| StorageError::upload(key, "invalid object key"))?;
        let copy = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(local_path, &path).await
        };
        bounded(self.timeout, copy)
            .await
            .map_err(|reason| StorageError::upload(key, reason))?;
        Ok(format!("file://{}", path.display()))
    }
}


/// S3 unless a local storage directory is configured.
pub async fn connect(
    bucket: &str,
    storage_dir: Option<&Path>,
    timeout: Duration,
) -> Arc<dyn ObjectStore> {
    match storage_dir {
        Some(dir) => {
            info!("using local object store at {}", dir.join(bucket).display());
            Arc::new(LocalObjectStore::new(dir.join(bucket), timeout))
        }
        None => {
            info!("using s3 bucket {}", bucket);
            Arc::new(S3ObjectStore::from_env(bucket, timeout).await)
        }
    }
}
