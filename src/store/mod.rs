//! Object store client abstraction.
//!
//! The service never talks to a provider SDK directly; it goes through
//! [`ObjectStoreClient`]. Two backends exist:
//! - [`cos::CosObjectStore`]: Tencent COS over its S3-compatible API
//! - [`local::LocalObjectStore`]: objects on local disk, for development
//!
//! A [`ClientFactory`] turns a [`StorageConfig`] into a client so the
//! service can rebuild it whenever the configuration changes.

pub mod cos;
pub mod local;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    future::Future,
    io,
    path::Path,
    sync::Arc,
    time::Duration,
};
use thiserror::Error;

use crate::{dates, models::StorageConfig};

/// Largest page a provider listing may return.
pub const MAX_LIST_KEYS: i32 = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Provider(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, key: String },
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One page request against a bucket listing.
#[derive(Clone, Debug)]
pub struct ListObjectsRequest {
    pub bucket: String,
    pub prefix: String,
    /// `None` lists every object; `Some("/")` groups by directory.
    pub delimiter: Option<String>,
    pub max_keys: i32,
    /// Cursor returned by the previous page.
    pub continuation: Option<String>,
}

impl ListObjectsRequest {
    /// A request for the whole bucket, first page.
    pub fn whole_bucket(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: String::new(),
            delimiter: None,
            max_keys: MAX_LIST_KEYS,
            continuation: None,
        }
    }
}

/// A listed object as it appears in a listing page.
#[derive(Clone, Debug)]
pub struct ObjectSummary {
    pub key: String,
    pub size: i64,
    pub last_modified: DateTime<Utc>,
}

#[derive(Clone, Debug, Default)]
pub struct ObjectListing {
    pub entries: Vec<ObjectSummary>,
    pub next_continuation: Option<String>,
    pub truncated: bool,
}

/// Per-object metadata fetched with a HEAD request.
#[derive(Clone, Debug)]
pub struct RemoteMetadata {
    pub size: i64,
    pub last_modified: DateTime<Utc>,
    pub request_id: Option<String>,
    pub version_id: Option<String>,
    pub checksum: Option<String>,
}

/// Result of a completed upload.
#[derive(Clone, Debug)]
pub struct UploadOutcome {
    pub last_modified: DateTime<Utc>,
    pub request_id: Option<String>,
    pub version_id: Option<String>,
    pub checksum: Option<String>,
}

/// Response headers the provider should send back when the signed URL is used.
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseOverrides {
    pub content_type: String,
    pub content_language: String,
    pub content_disposition: String,
    pub cache_control: String,
    pub expires: DateTime<Utc>,
}

impl ResponseOverrides {
    /// `Expires` header value in RFC 822 form.
    pub fn expires_header(&self) -> String {
        dates::format_rfc822(self.expires)
    }
}

/// A GET presign request for a single object.
#[derive(Clone, Debug)]
pub struct PresignRequest {
    pub bucket: String,
    pub key: String,
    /// Moment the signature stops being accepted.
    pub signature_expires: DateTime<Utc>,
    pub overrides: ResponseOverrides,
}

impl PresignRequest {
    /// Remaining signature lifetime relative to `now`, never negative.
    pub fn lifetime_from(&self, now: DateTime<Utc>) -> Duration {
        (self.signature_expires - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Operations the service needs from a remote object store.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn list_objects(&self, request: &ListObjectsRequest) -> StoreResult<ObjectListing>;

    async fn object_metadata(&self, bucket: &str, key: &str) -> StoreResult<RemoteMetadata>;

    /// Upload the file at `path` (already staged on disk) under `key`.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        size: u64,
    ) -> StoreResult<UploadOutcome>;

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()>;

    async fn presign_get(&self, request: &PresignRequest) -> StoreResult<String>;
}

/// Builds a client for a given configuration.
pub trait ClientFactory: Send + Sync {
    fn build(&self, config: &StorageConfig) -> StoreResult<Arc<dyn ObjectStoreClient>>;
}

/// Factory for the COS backend.
#[derive(Clone, Debug, Default)]
pub struct CosClientFactory {
    /// Overrides `https://cos.<region>.myqcloud.com`, e.g. for an S3 emulator.
    pub endpoint_override: Option<String>,
}

impl ClientFactory for CosClientFactory {
    fn build(&self, config: &StorageConfig) -> StoreResult<Arc<dyn ObjectStoreClient>> {
        Ok(Arc::new(cos::CosObjectStore::new(
            config,
            self.endpoint_override.as_deref(),
        )))
    }
}

/// Factory for the on-disk development backend.
///
/// The local store signs with a process-wide key rather than the configured
/// credentials, so every configuration shares one instance.
#[derive(Clone, Debug)]
pub struct LocalClientFactory {
    pub store: Arc<local::LocalObjectStore>,
}

impl ClientFactory for LocalClientFactory {
    fn build(&self, _config: &StorageConfig) -> StoreResult<Arc<dyn ObjectStoreClient>> {
        Ok(self.store.clone())
    }
}

/// Run a provider call under a deadline; elapsing maps to [`StoreError::Timeout`].
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(deadline)),
    }
}
