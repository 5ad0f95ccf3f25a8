use async_trait::async_trait;
use chrono::{DateTime, Utc};
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::fmt;

/// Object-store key for a request's blobs.
///
/// Photos and results live under separate prefixes, and every result upload
/// gets its own timestamped key, so no two writes ever share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlobKey {
    Photo(i64),
    Result { request_id: i64, stamp: String },
}

impl BlobKey {
    pub fn photo(request_id: i64) -> Self {
        Self::Photo(request_id)
    }

    pub fn result(request_id: i64, at: DateTime<Utc>) -> Self {
        Self::Result {
            request_id,
            stamp: at.format("%Y%m%dT%H%M%S%.6fZ").to_string(),
        }
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Photo(id) => write!(f, "photo/{id}"),
            Self::Result { request_id, stamp } => write!(f, "result/{request_id}/{stamp}"),
        }
    }
}

/// Binary blob storage keyed by [`BlobKey`].
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &BlobKey, data: &[u8], content_type: &str)
        -> Result<(), StorageError>;

    async fn get(&self, key: &BlobKey) -> Result<Vec<u8>, StorageError>;

    async fn delete(&self, key: &BlobKey) -> Result<(), StorageError>;

    /// Public URL under which `key` is served.
    fn url_for(&self, key: &BlobKey) -> String;
}

/// Client for an S3-compatible bucket (R2, MinIO, AWS).
pub struct S3BlobStore {
    bucket: Box<Bucket>,
    public_base: String,
}

impl S3BlobStore {
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
            public_base: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Serve result URLs from a CDN or public host instead of the API endpoint.
    pub fn with_public_base(mut self, base: &str) -> Self {
        self.public_base = base.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &BlobKey, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        let path = key.to_string();
        let response = self
            .bucket
            .put_object_with_content_type(&path, data, content_type)
            .await?;
        check_status(&path, response.status_code())
    }

    async fn get(&self, key: &BlobKey) -> Result<Vec<u8>, StorageError> {
        let path = key.to_string();
        let response = self.bucket.get_object(&path).await?;
        if response.status_code() == 404 {
            return Err(StorageError::Missing(path));
        }
        check_status(&path, response.status_code())?;
        Ok(response.to_vec())
    }

    async fn delete(&self, key: &BlobKey) -> Result<(), StorageError> {
        let path = key.to_string();
        let response = self.bucket.delete_object(&path).await?;
        check_status(&path, response.status_code())
    }

    fn url_for(&self, key: &BlobKey) -> String {
        format!("{}/{}/{}", self.public_base, self.bucket.name(), key)
    }
}

fn check_status(key: &str, status: u16) -> Result<(), StorageError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(StorageError::Status {
            key: key.to_string(),
            status,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("object {0} does not exist")]
    Missing(String),

    #[error("object store returned status {status} for {key}")]
    Status { key: String, status: u16 },

    #[error("Storage configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn photo_and_result_keys_never_collide() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        assert_eq!(BlobKey::photo(1).to_string(), "photo/1");
        assert_eq!(
            BlobKey::result(1, at).to_string(),
            "result/1/20240501T120000.000000Z"
        );
        assert_ne!(
            BlobKey::result(1, at),
            BlobKey::result(1, at + chrono::Duration::microseconds(1))
        );
    }

    #[test]
    fn urls_are_built_from_the_public_base() {
        let store = S3BlobStore::new(
            "images",
            "https://minio.local:9000/",
            "us-east-1",
            "access",
            "secret",
            true,
        )
        .unwrap();
        assert_eq!(
            store.url_for(&BlobKey::photo(4)),
            "https://minio.local:9000/images/photo/4"
        );

        let store = store.with_public_base("https://cdn.example.com");
        assert_eq!(
            store.url_for(&BlobKey::photo(4)),
            "https://cdn.example.com/images/photo/4"
        );
    }

    #[test]
    fn status_outside_2xx_is_an_error() {
        assert!(check_status("photo/1", 200).is_ok());
        assert!(check_status("photo/1", 204).is_ok());
        assert!(matches!(
            check_status("photo/1", 403),
            Err(StorageError::Status { status: 403, .. })
        ));
    }
}
