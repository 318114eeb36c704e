//! Scripted in-memory object store for service tests.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::{
    collections::BTreeMap,
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use uuid::Uuid;

use crate::{
    models::{StorageConfig, Visibility},
    store::{
        ClientFactory, ListObjectsRequest, ObjectListing, ObjectStoreClient, ObjectSummary,
        PresignRequest, RemoteMetadata, StoreError, StoreResult, UploadOutcome,
    },
};

pub const BUCKET: &str = "photos-1250000000";

pub fn persisted_config() -> StorageConfig {
    StorageConfig {
        id: Some(Uuid::new_v4()),
        secret_id: "AKIDexample".into(),
        secret_key: "secret".into(),
        bucket_name: BUCKET.into(),
        region: "ap-guangzhou".into(),
        host: "https://photos-1250000000.cos.ap-guangzhou.myqcloud.com".into(),
        visibility: Visibility::Public,
    }
}

pub fn stamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap()
}

/// Bucket whose listing is scripted page by page.
///
/// Continuation tokens are `page-<n>` where `n` is the zero-based page index.
#[derive(Default)]
pub struct FakeStore {
    pages: Mutex<Vec<Vec<String>>>,
    objects: Mutex<BTreeMap<String, i64>>,
    fail_list_page: Mutex<Option<usize>>,
    fail_puts: AtomicBool,
    fail_presign: AtomicBool,
    presigned: Mutex<Vec<PresignRequest>>,
    list_calls: AtomicUsize,
    head_calls: AtomicUsize,
    other_calls: AtomicUsize,
    listed_pages: Mutex<Vec<usize>>,
}

impl FakeStore {
    pub fn with_pages(pages: &[&[&str]]) -> Self {
        let store = Self::default();
        store.set_pages(pages);
        store
    }

    pub fn set_pages(&self, pages: &[&[&str]]) {
        let scripted: Vec<Vec<String>> = pages
            .iter()
            .map(|page| page.iter().map(|k| k.to_string()).collect())
            .collect();
        {
            let mut objects = self.objects.lock().unwrap();
            for key in scripted.iter().flatten() {
                objects.insert(key.clone(), 100 + key.len() as i64);
            }
        }
        *self.pages.lock().unwrap() = scripted;
    }

    pub fn fail_listing_on(&self, page: Option<usize>) {
        *self.fail_list_page.lock().unwrap() = page;
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_presign(&self, fail: bool) {
        self.fail_presign.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn presigned(&self) -> Vec<PresignRequest> {
        self.presigned.lock().unwrap().clone()
    }

    /// Zero-based indexes of the pages served, in order.
    pub fn listed_pages(&self) -> Vec<usize> {
        self.listed_pages.lock().unwrap().clone()
    }

    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
            + self.head_calls.load(Ordering::SeqCst)
            + self.other_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStoreClient for FakeStore {
    async fn list_objects(&self, request: &ListObjectsRequest) -> StoreResult<ObjectListing> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let index = match request.continuation.as_deref() {
            None => 0,
            Some(token) => token
                .strip_prefix("page-")
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| StoreError::Provider(format!("bad token {token}")))?,
        };
        if *self.fail_list_page.lock().unwrap() == Some(index) {
            return Err(StoreError::Provider("SlowDown: please reduce your request rate".into()));
        }
        self.listed_pages.lock().unwrap().push(index);

        let pages = self.pages.lock().unwrap();
        let keys = pages.get(index).cloned().unwrap_or_default();
        let truncated = index + 1 < pages.len();
        let objects = self.objects.lock().unwrap();
        Ok(ObjectListing {
            entries: keys
                .into_iter()
                .map(|key| ObjectSummary {
                    size: objects.get(&key).copied().unwrap_or_default(),
                    key,
                    last_modified: stamp(),
                })
                .collect(),
            next_continuation: truncated.then(|| format!("page-{}", index + 1)),
            truncated,
        })
    }

    async fn object_metadata(&self, bucket: &str, key: &str) -> StoreResult<RemoteMetadata> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        let size = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .copied()
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.into(),
                key: key.into(),
            })?;
        Ok(RemoteMetadata {
            size,
            last_modified: stamp(),
            request_id: Some(format!("req-{key}")),
            version_id: None,
            checksum: Some(format!("crc-{key}")),
        })
    }

    async fn put_object(
        &self,
        _bucket: &str,
        key: &str,
        path: &Path,
        size: u64,
    ) -> StoreResult<UploadOutcome> {
        self.other_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Provider("AccessDenied: signature mismatch".into()));
        }
        let staged = tokio::fs::metadata(path).await?;
        assert_eq!(staged.len(), size, "staged file size");
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), size as i64);
        Ok(UploadOutcome {
            last_modified: stamp(),
            request_id: Some("req-put".into()),
            version_id: Some("v1".into()),
            checksum: Some("etag".into()),
        })
    }

    async fn delete_object(&self, _bucket: &str, key: &str) -> StoreResult<()> {
        self.other_calls.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn presign_get(&self, request: &PresignRequest) -> StoreResult<String> {
        self.other_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_presign.load(Ordering::SeqCst) {
            return Err(StoreError::Provider("InvalidAccessKeyId".into()));
        }
        self.presigned.lock().unwrap().push(request.clone());
        Ok(format!(
            "https://{}.cos.example/{}?sign={}",
            request.bucket,
            request.key,
            request.signature_expires.timestamp()
        ))
    }
}

pub struct FakeFactory {
    store: Arc<FakeStore>,
    builds: AtomicUsize,
}

impl FakeFactory {
    pub fn new(store: Arc<FakeStore>) -> Self {
        Self {
            store,
            builds: AtomicUsize::new(0),
        }
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl ClientFactory for FakeFactory {
    fn build(&self, _config: &StorageConfig) -> StoreResult<Arc<dyn ObjectStoreClient>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(self.store.clone())
    }
}
