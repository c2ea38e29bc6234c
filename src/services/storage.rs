use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::time::Duration;

/// Blob storage for source and annotated images.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Reference the detector can use to read objects directly (bucket name).
    fn store_ref(&self) -> &str;

    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Time-limited public read URL for `key`.
    async fn sign_read_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;
}

/// S3-compatible object storage (AWS S3, Cloudflare R2, MinIO).
pub struct S3ArtifactStore {
    bucket: Box<Bucket>,
    bucket_name: String,
}

impl S3ArtifactStore {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        path_style: bool,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let mut bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;
        if path_style {
            bucket = bucket.with_path_style();
        }

        Ok(Self {
            bucket,
            bucket_name: bucket_name.to_string(),
        })
    }

    /// Delete an object. Only used to clean up after integration runs.
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.bucket.delete_object(key).await.map_err(StorageError::S3)?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    fn store_ref(&self) -> &str {
        &self.bucket_name
    }

    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(StorageError::S3)?;
        check_status(key, response.status_code())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(key).await.map_err(StorageError::S3)?;
        check_status(key, response.status_code())?;
        Ok(response.to_vec())
    }

    async fn sign_read_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let expiry_secs = u32::try_from(ttl.as_secs()).unwrap_or(u32::MAX);
        self.bucket
            .presign_get(key, expiry_secs, None)
            .await
            .map_err(StorageError::S3)
    }
}

// Built without `fail-on-err`, so non-2xx responses come back as data.
fn check_status(key: &str, status: u16) -> Result<(), StorageError> {
    match status {
        200..=299 => Ok(()),
        404 => Err(StorageError::NotFound(key.to_string())),
        code => Err(StorageError::Status { code, key: key.to_string() }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("S3 returned status {code} for {key}")]
    Status { code: u16, key: String },

    #[error("Storage operation timed out")]
    Timeout,

    #[error("Storage configuration error: {0}")]
    Config(String),
}
