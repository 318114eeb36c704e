//! Tencent COS backend, spoken to through its S3-compatible API.
//!
//! Credentials come straight from the [`StorageConfig`]; the endpoint is
//! `https://cos.<region>.myqcloud.com` unless overridden.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{
    Client,
    config::Credentials,
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    operation::RequestId,
    presigning::PresigningConfig,
    primitives::{ByteStream, DateTime as SdkDateTime, Length},
    types::{CompletedMultipartUpload, CompletedPart},
};
use chrono::{DateTime, Utc};
use std::{fmt, io, path::Path, sync::Arc};
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, instrument, warn};

use super::{
    ListObjectsRequest, ObjectListing, ObjectStoreClient, ObjectSummary, PresignRequest,
    RemoteMetadata, StoreError, StoreResult, UploadOutcome,
};
use crate::{files::MIB, models::StorageConfig};

/// Files above this size go through multipart upload.
const MULTIPART_THRESHOLD: u64 = 8 * MIB;
const PART_SIZE: u64 = 8 * MIB;
/// Parts in flight at once for a single upload.
const UPLOAD_CONCURRENCY: usize = 4;

pub struct CosObjectStore {
    client: Client,
    endpoint: String,
}

impl fmt::Debug for CosObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CosObjectStore")
            .field("endpoint", &self.endpoint)
            .field("client", &"<S3Client>")
            .finish()
    }
}

impl CosObjectStore {
    /// Build a client from static credentials; no network I/O happens here.
    pub fn new(config: &StorageConfig, endpoint_override: Option<&str>) -> Self {
        let endpoint = endpoint_override
            .map(str::to_string)
            .unwrap_or_else(|| format!("https://cos.{}.myqcloud.com", config.region));
        let credentials = Credentials::new(
            config.secret_id.clone(),
            config.secret_key.clone(),
            None,
            None,
            "storage-config",
        );
        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(endpoint.clone())
            .build();
        debug!(endpoint = %endpoint, bucket = %config.bucket_name, "built COS client");
        Self {
            client: Client::from_conf(sdk_config),
            endpoint,
        }
    }

    async fn put_single(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        size: u64,
    ) -> StoreResult<UploadOutcome> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|err| StoreError::Io(io::Error::other(err)))?;
        let out = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(size as i64)
            .body(body)
            .send()
            .await
            .map_err(provider_error)?;

        Ok(UploadOutcome {
            last_modified: Utc::now(),
            request_id: out.request_id().map(str::to_string),
            version_id: out.version_id().map(str::to_string),
            checksum: out.e_tag().map(strip_quotes),
        })
    }

    async fn put_multipart(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        size: u64,
    ) -> StoreResult<UploadOutcome> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(provider_error)?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| StoreError::Provider("provider returned no upload id".into()))?
            .to_string();

        let parts = match self.upload_parts(bucket, key, &upload_id, path, size).await {
            Ok(parts) => parts,
            Err(err) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        key,
                        upload_id = %upload_id,
                        error = %DisplayErrorContext(&abort_err),
                        "failed to abort multipart upload"
                    );
                }
                return Err(err);
            }
        };

        let out = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(provider_error)?;

        Ok(UploadOutcome {
            last_modified: Utc::now(),
            request_id: out.request_id().map(str::to_string),
            version_id: out.version_id().map(str::to_string),
            checksum: out.e_tag().map(strip_quotes),
        })
    }

    /// Upload every part through a bounded pool that lives only for this call.
    ///
    /// Returning early drops the `JoinSet`, which aborts parts still in flight.
    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        path: &Path,
        size: u64,
    ) -> StoreResult<Vec<CompletedPart>> {
        let permits = Arc::new(Semaphore::new(UPLOAD_CONCURRENCY));
        let mut tasks = JoinSet::new();

        let mut offset = 0u64;
        let mut part_number = 1i32;
        while offset < size {
            let length = PART_SIZE.min(size - offset);
            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| StoreError::Provider("upload pool closed".into()))?;

            let client = self.client.clone();
            let bucket = bucket.to_string();
            let key = key.to_string();
            let upload_id = upload_id.to_string();
            let path = path.to_path_buf();
            tasks.spawn(async move {
                let _permit = permit;
                let body = ByteStream::read_from()
                    .path(&path)
                    .offset(offset)
                    .length(Length::Exact(length))
                    .build()
                    .await
                    .map_err(|err| StoreError::Io(io::Error::other(err)))?;
                let out = client
                    .upload_part()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .part_number(part_number)
                    .body(body)
                    .send()
                    .await
                    .map_err(provider_error)?;
                Ok::<_, StoreError>(
                    CompletedPart::builder()
                        .part_number(part_number)
                        .set_e_tag(out.e_tag().map(str::to_string))
                        .build(),
                )
            });

            offset += length;
            part_number += 1;
        }

        let mut parts = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            let part = joined
                .map_err(|err| StoreError::Provider(format!("part upload task failed: {err}")))??;
            parts.push(part);
        }
        parts.sort_by_key(|part| part.part_number());
        Ok(parts)
    }
}

#[async_trait]
impl ObjectStoreClient for CosObjectStore {
    #[instrument(skip(self, request), fields(bucket = %request.bucket))]
    async fn list_objects(&self, request: &ListObjectsRequest) -> StoreResult<ObjectListing> {
        let mut call = self
            .client
            .list_objects_v2()
            .bucket(&request.bucket)
            .max_keys(request.max_keys);
        if !request.prefix.is_empty() {
            call = call.prefix(&request.prefix);
        }
        if let Some(delimiter) = &request.delimiter {
            call = call.delimiter(delimiter);
        }
        if let Some(token) = &request.continuation {
            call = call.continuation_token(token);
        }
        let resp = call.send().await.map_err(provider_error)?;

        let mut entries = Vec::with_capacity(resp.contents().len());
        for object in resp.contents() {
            let Some(key) = object.key() else {
                continue;
            };
            entries.push(ObjectSummary {
                key: key.to_string(),
                size: object.size().unwrap_or(0),
                last_modified: last_modified_or_now(object.last_modified(), key),
            });
        }

        Ok(ObjectListing {
            entries,
            next_continuation: resp.next_continuation_token().map(str::to_string),
            truncated: resp.is_truncated().unwrap_or(false),
        })
    }

    async fn object_metadata(&self, bucket: &str, key: &str) -> StoreResult<RemoteMetadata> {
        let out = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    StoreError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    provider_error(err)
                }
            })?;

        Ok(RemoteMetadata {
            size: out.content_length().unwrap_or(0),
            last_modified: last_modified_or_now(out.last_modified(), key),
            request_id: out.request_id().map(str::to_string),
            version_id: out.version_id().map(str::to_string),
            checksum: out.e_tag().map(strip_quotes),
        })
    }

    #[instrument(skip(self, path))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        size: u64,
    ) -> StoreResult<UploadOutcome> {
        if size > MULTIPART_THRESHOLD {
            self.put_multipart(bucket, key, path, size).await
        } else {
            self.put_single(bucket, key, path, size).await
        }
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(provider_error)?;
        Ok(())
    }

    async fn presign_get(&self, request: &PresignRequest) -> StoreResult<String> {
        let presigning = PresigningConfig::expires_in(request.lifetime_from(Utc::now()))
            .map_err(|err| StoreError::Provider(err.to_string()))?;
        let overrides = &request.overrides;
        let presigned = self
            .client
            .get_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .response_content_type(&overrides.content_type)
            .response_content_language(&overrides.content_language)
            .response_content_disposition(&overrides.content_disposition)
            .response_cache_control(&overrides.cache_control)
            .response_expires(SdkDateTime::from_secs(overrides.expires.timestamp()))
            .presigned(presigning)
            .await
            .map_err(provider_error)?;
        Ok(presigned.uri().to_string())
    }
}

/// Prefer the provider's own message; fall back to the full error chain.
fn provider_error<E, R>(err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: fmt::Debug,
{
    let message = err
        .as_service_error()
        .and_then(|service| service.message())
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
    StoreError::Provider(message)
}

fn to_chrono(at: &SdkDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(at.secs(), at.subsec_nanos())
}

/// Provider timestamp, or the current time when it is missing or out of range.
fn last_modified_or_now(at: Option<&SdkDateTime>, key: &str) -> DateTime<Utc> {
    match at.and_then(to_chrono) {
        Some(at) => at,
        None => {
            warn!(key, "provider sent no usable last-modified time, using now");
            Utc::now()
        }
    }
}

fn strip_quotes(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}
