//! CosService — configuration, uploads, signed access, deletion and
//! reconciliation for the configured bucket.
//!
//! Metadata lives in SQLite; objects live with the provider behind
//! [`ObjectStoreClient`]. The provider client is cached per configuration.

use bytes::Bytes;
use sqlx::SqlitePool;
use std::{
    io::ErrorKind,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    ServiceError, ServiceResult, SyncReport, client_cache::ClientCache, presign, reconciler,
};
use crate::{
    dates, files,
    models::{ObjectRecord, Page, RecordQuery, StorageConfig, Visibility},
    repository::{ConfigRepository, RecordRepository},
    store::{ClientFactory, ObjectStoreClient, StoreError, with_deadline},
};

/// Limits and locations the service runs with.
#[derive(Clone, Debug)]
pub struct ServiceSettings {
    /// Upload ceiling in MiB, inclusive.
    pub max_upload_mb: u64,
    /// Directory uploads are staged in before transfer.
    pub staging_dir: PathBuf,
    /// Deadline applied to every provider call.
    pub provider_timeout: Duration,
}

#[derive(Clone)]
pub struct CosService {
    /// Shared SQLite pool, also used by the readiness probe.
    pub db: Arc<SqlitePool>,
    pub settings: ServiceSettings,
    configs: ConfigRepository,
    records: RecordRepository,
    clients: Arc<ClientCache>,
}

impl CosService {
    pub fn new(db: Arc<SqlitePool>, factory: Arc<dyn ClientFactory>, settings: ServiceSettings) -> Self {
        Self {
            configs: ConfigRepository::new(db.clone()),
            records: RecordRepository::new(db.clone()),
            clients: Arc::new(ClientCache::new(factory)),
            db,
            settings,
        }
    }

    /// The saved configuration, or an empty unsaved one.
    pub async fn find_config(&self) -> ServiceResult<StorageConfig> {
        Ok(self.configs.find().await?.unwrap_or_default())
    }

    /// Validate and save the configuration, then align record visibility with it.
    pub async fn configure(&self, config: StorageConfig) -> ServiceResult<StorageConfig> {
        if !config.has_valid_host() {
            return Err(ServiceError::InvalidConfiguration(format!(
                "host `{}` must start with http:// or https://",
                config.host
            )));
        }
        if config.bucket_name.trim().is_empty() || config.region.trim().is_empty() {
            return Err(ServiceError::InvalidConfiguration(
                "bucket name and region are required".into(),
            ));
        }

        let saved = self.configs.save(&config).await?;
        self.clients.invalidate().await;
        let updated = self.update_visibility(saved.visibility).await?;
        info!(
            bucket = %saved.bucket_name,
            region = %saved.region,
            visibility = saved.visibility.as_str(),
            records = updated,
            "storage configuration saved"
        );
        Ok(saved)
    }

    pub async fn update_visibility(&self, visibility: Visibility) -> ServiceResult<u64> {
        Ok(self.records.update_visibility(visibility).await?)
    }

    pub async fn list_records(&self, query: &RecordQuery) -> ServiceResult<Page<ObjectRecord>> {
        Ok(self.records.query(query).await?)
    }

    /// Look up a record by its id string; malformed ids are simply not found.
    pub async fn find_record(&self, id: &str) -> ServiceResult<ObjectRecord> {
        let not_found = || ServiceError::RecordNotFound(id.to_string());
        let uuid = Uuid::parse_str(id).map_err(|_| not_found())?;
        self.records.find_by_id(uuid).await?.ok_or_else(not_found)
    }

    /// Store `bytes` as `<identity>/<file_name>` and record it.
    ///
    /// Uploading to a key that already exists replaces the object and keeps
    /// the record's id.
    pub async fn upload(&self, bytes: Bytes, file_name: &str, identity: &str) -> ServiceResult<ObjectRecord> {
        let size = bytes.len() as u64;
        if !files::within_limit(self.settings.max_upload_mb, size) {
            return Err(ServiceError::PayloadTooLarge {
                limit_mb: self.settings.max_upload_mb,
            });
        }

        let config = self.active_config().await?;

        let file_name = files::file_name_of(file_name.trim());
        if file_name.is_empty() || file_name == "." || file_name == ".." {
            return Err(ServiceError::BadRequest("file name is required".into()));
        }
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(ServiceError::BadRequest("user identity is required".into()));
        }
        if !is_plain_segment(identity) {
            return Err(ServiceError::BadRequest(format!(
                "user identity `{identity}` must be a single path segment"
            )));
        }
        let key = format!("{identity}/{file_name}");

        let staged = self.stage(&bytes).await?;
        let client = self.client(&config).await?;
        let outcome = with_deadline(
            self.settings.provider_timeout,
            client.put_object(&config.bucket_name, &key, &staged.path, size),
        )
        .await
        .map_err(|err| match err {
            timeout @ StoreError::Timeout(_) => ServiceError::from(timeout),
            other => ServiceError::BadRequest(other.to_string()),
        })?;
        drop(staged);

        let record = ObjectRecord {
            id: Uuid::new_v4(),
            key,
            file_name: file_name.to_string(),
            file_size: size as i64,
            suffix: files::suffix_of(file_name).to_string(),
            bucket_name: config.bucket_name.clone(),
            visibility: config.visibility,
            updated_at: dates::truncate_to_seconds(outcome.last_modified),
            request_id: outcome.request_id,
            version_id: outcome.version_id,
            checksum: outcome.checksum,
        };
        let saved = self.records.upsert(&record).await?;
        info!(key = %saved.key, size, id = %saved.id, "object uploaded");
        Ok(saved)
    }

    pub async fn issue_url(&self, record: &ObjectRecord) -> ServiceResult<String> {
        let config = self.active_config().await?;
        let client = self.client(&config).await?;
        presign::issue_url(client.as_ref(), record, self.settings.provider_timeout).await
    }

    pub async fn issue_url_by_id(&self, id: &str) -> ServiceResult<String> {
        let record = self.find_record(id).await?;
        self.issue_url(&record).await
    }

    /// Remove the remote object, then its record.
    pub async fn delete(&self, record: &ObjectRecord) -> ServiceResult<()> {
        let config = self.active_config().await?;
        let client = self.client(&config).await?;
        with_deadline(
            self.settings.provider_timeout,
            client.delete_object(&record.bucket_name, &record.key),
        )
        .await?;
        self.records.delete_by_id(record.id).await?;
        info!(key = %record.key, id = %record.id, "object deleted");
        Ok(())
    }

    pub async fn delete_by_id(&self, id: &str) -> ServiceResult<()> {
        let record = self.find_record(id).await?;
        self.delete(&record).await
    }

    /// Delete each id in order; the first failure stops the remaining deletions.
    pub async fn delete_all(&self, ids: &[String]) -> ServiceResult<usize> {
        for (done, id) in ids.iter().enumerate() {
            if let Err(err) = self.delete_by_id(id).await {
                warn!(id = %id, deleted = done, remaining = ids.len() - done, "bulk delete stopped: {err}");
                return Err(err);
            }
        }
        Ok(ids.len())
    }

    pub async fn synchronize(&self) -> ServiceResult<SyncReport> {
        let config = self.active_config().await?;
        let client = self.client(&config).await?;
        reconciler::synchronize(&self.records, client.as_ref(), &config, self.settings.provider_timeout).await
    }

    async fn active_config(&self) -> ServiceResult<StorageConfig> {
        match self.configs.find().await? {
            Some(config) if config.is_persisted() => Ok(config),
            _ => Err(ServiceError::ConfigurationMissing),
        }
    }

    async fn client(&self, config: &StorageConfig) -> ServiceResult<Arc<dyn ObjectStoreClient>> {
        Ok(self.clients.client_for(config).await?)
    }

    async fn stage(&self, bytes: &Bytes) -> ServiceResult<StagedFile> {
        fs::create_dir_all(&self.settings.staging_dir).await?;
        let staged = StagedFile {
            path: self
                .settings
                .staging_dir
                .join(format!(".upload-{}", Uuid::new_v4())),
        };
        let mut file = fs::File::create(&staged.path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        debug!(path = ?staged.path, size = bytes.len(), "staged upload");
        Ok(staged)
    }
}

/// True when `segment` cannot change the directory part of a key.
fn is_plain_segment(segment: &str) -> bool {
    !segment.contains(['/', '\\'])
        && !segment.contains("..")
        && !segment.chars().any(char::is_control)
}

/// Upload staging file, removed when dropped.
struct StagedFile {
    path: PathBuf,
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                warn!(path = ?self.path, "failed to remove staged upload: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::test_pool,
        files::MIB,
        services::test_support::{FakeFactory, FakeStore, persisted_config},
    };

    struct Harness {
        service: CosService,
        store: Arc<FakeStore>,
        staging: PathBuf,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.staging);
        }
    }

    async fn harness(store: FakeStore) -> Harness {
        let store = Arc::new(store);
        let staging = std::env::temp_dir().join(format!("cos-sync-staging-{}", Uuid::new_v4()));
        let service = CosService::new(
            Arc::new(test_pool().await),
            Arc::new(FakeFactory::new(store.clone())),
            ServiceSettings {
                max_upload_mb: 1,
                staging_dir: staging.clone(),
                provider_timeout: Duration::from_secs(5),
            },
        );
        Harness {
            service,
            store,
            staging,
        }
    }

    async fn configured(store: FakeStore) -> Harness {
        let h = harness(store).await;
        let mut config = persisted_config();
        config.id = None;
        h.service.configure(config).await.unwrap();
        h
    }

    fn staged_files(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn configure_checks_host_scheme() {
        let h = harness(FakeStore::default()).await;
        let mut config = persisted_config();
        config.id = None;

        config.host = "ftp://x".into();
        let err = h.service.configure(config.clone()).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidConfiguration(_)));
        assert!(!h.service.find_config().await.unwrap().is_persisted());

        config.host = "https://x".into();
        let saved = h.service.configure(config).await.unwrap();
        assert!(saved.is_persisted());
        assert_eq!(h.service.find_config().await.unwrap(), saved);
    }

    #[tokio::test]
    async fn configure_applies_visibility_to_records() {
        let h = configured(FakeStore::with_pages(&[&["a/x.png", "a/y.png"]])).await;
        h.service.synchronize().await.unwrap();

        let mut config = h.service.find_config().await.unwrap();
        config.visibility = Visibility::Private;
        h.service.configure(config).await.unwrap();

        let page = h.service.list_records(&RecordQuery::default()).await.unwrap();
        assert_eq!(page.total_elements, 2);
        assert!(page.content.iter().all(|r| r.visibility == Visibility::Private));
    }

    #[tokio::test]
    async fn upload_size_limit_is_inclusive() {
        let h = configured(FakeStore::default()).await;

        let exact = Bytes::from(vec![7u8; MIB as usize]);
        let record = h.service.upload(exact, "big.bin", "alice").await.unwrap();
        assert_eq!(record.key, "alice/big.bin");
        assert_eq!(record.file_size, MIB as i64);
        assert_eq!(record.suffix, "bin");
        assert!(h.store.contains("alice/big.bin"));

        let calls = h.store.total_calls();
        let over = Bytes::from(vec![7u8; MIB as usize + 1]);
        let err = h.service.upload(over, "bigger.bin", "alice").await.unwrap_err();
        assert!(matches!(err, ServiceError::PayloadTooLarge { limit_mb: 1 }));
        assert_eq!(h.store.total_calls(), calls);
        assert_eq!(staged_files(&h.staging), 0);
    }

    #[tokio::test]
    async fn upload_requires_saved_config() {
        let h = harness(FakeStore::default()).await;
        let err = h
            .service
            .upload(Bytes::from_static(b"hi"), "a.txt", "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ConfigurationMissing));
        assert_eq!(h.store.total_calls(), 0);
    }

    #[tokio::test]
    async fn provider_upload_failure_is_a_bad_request() {
        let h = configured(FakeStore::default()).await;
        h.store.fail_puts(true);

        let err = h
            .service
            .upload(Bytes::from_static(b"hi"), "a.txt", "alice")
            .await
            .unwrap_err();
        match err {
            ServiceError::BadRequest(message) => assert!(message.starts_with("AccessDenied")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(staged_files(&h.staging), 0);
        let page = h.service.list_records(&RecordQuery::default()).await.unwrap();
        assert_eq!(page.total_elements, 0);
    }

    #[tokio::test]
    async fn reupload_keeps_record_id() {
        let h = configured(FakeStore::default()).await;
        let first = h
            .service
            .upload(Bytes::from_static(b"one"), "notes.txt", "alice")
            .await
            .unwrap();
        let second = h
            .service
            .upload(Bytes::from_static(b"second"), "notes.txt", "alice")
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.file_size, 6);
    }

    #[tokio::test]
    async fn unknown_id_never_reaches_provider() {
        let h = configured(FakeStore::default()).await;
        let missing = Uuid::new_v4().to_string();

        let err = h.service.issue_url_by_id(&missing).await.unwrap_err();
        assert!(matches!(err, ServiceError::RecordNotFound(_)));
        let err = h.service.delete_by_id(&missing).await.unwrap_err();
        assert!(matches!(err, ServiceError::RecordNotFound(_)));
        let err = h.service.delete_by_id("not-a-uuid").await.unwrap_err();
        assert!(matches!(err, ServiceError::RecordNotFound(_)));

        assert_eq!(h.store.total_calls(), 0);
    }

    #[tokio::test]
    async fn issue_and_delete_by_id() {
        let h = configured(FakeStore::default()).await;
        let record = h
            .service
            .upload(Bytes::from_static(b"png"), "cat.png", "alice")
            .await
            .unwrap();

        let url = h.service.issue_url_by_id(&record.id.to_string()).await.unwrap();
        assert!(url.contains("alice/cat.png"));
        assert_eq!(h.store.presigned()[0].overrides.content_type, "image/png");

        h.service.delete_by_id(&record.id.to_string()).await.unwrap();
        assert!(!h.store.contains("alice/cat.png"));
        let err = h.service.find_record(&record.id.to_string()).await.unwrap_err();
        assert!(matches!(err, ServiceError::RecordNotFound(_)));
    }

    #[tokio::test]
    async fn identities_cannot_inject_path_segments() {
        let h = configured(FakeStore::default()).await;
        for identity in ["a/../b", "a/b", "..", "a\\b"] {
            let err = h
                .service
                .upload(Bytes::from_static(b"x"), "x.txt", identity)
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::BadRequest(_)), "{identity}");
        }
        assert_eq!(h.store.total_calls(), 0);
        assert_eq!(staged_files(&h.staging), 0);
    }

    #[tokio::test]
    async fn upload_after_bucket_switch_keeps_old_record() {
        let h = configured(FakeStore::default()).await;
        let old = h
            .service
            .upload(Bytes::from_static(b"old"), "cat.png", "alice")
            .await
            .unwrap();

        let mut config = h.service.find_config().await.unwrap();
        config.bucket_name = "other-1250000000".into();
        h.service.configure(config).await.unwrap();
        let new = h
            .service
            .upload(Bytes::from_static(b"newer"), "cat.png", "alice")
            .await
            .unwrap();

        assert_ne!(old.id, new.id);
        assert_eq!(new.bucket_name, "other-1250000000");
        let kept = h.service.find_record(&old.id.to_string()).await.unwrap();
        assert_eq!(kept.bucket_name, old.bucket_name);
        assert_eq!(kept.file_size, 3);
    }

    #[tokio::test]
    async fn delete_all_stops_at_first_failure() {
        let h = configured(FakeStore::default()).await;
        let a = h.service.upload(Bytes::from_static(b"a"), "a.txt", "bob").await.unwrap();
        let c = h.service.upload(Bytes::from_static(b"c"), "c.txt", "bob").await.unwrap();

        let ids = vec![a.id.to_string(), Uuid::new_v4().to_string(), c.id.to_string()];
        let err = h.service.delete_all(&ids).await.unwrap_err();
        assert!(matches!(err, ServiceError::RecordNotFound(_)));

        assert!(!h.store.contains("bob/a.txt"));
        assert!(h.store.contains("bob/c.txt"));
        assert!(h.service.find_record(&c.id.to_string()).await.is_ok());

        assert_eq!(h.service.delete_all(&[c.id.to_string()]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn synchronize_uses_saved_config() {
        let h = harness(FakeStore::with_pages(&[&["x/a.png"]])).await;
        let err = h.service.synchronize().await.unwrap_err();
        assert!(matches!(err, ServiceError::ConfigurationMissing));
        assert_eq!(h.store.total_calls(), 0);

        let mut config = persisted_config();
        config.id = None;
        h.service.configure(config).await.unwrap();
        let report = h.service.synchronize().await.unwrap();
        assert_eq!(report.inserted, 1);
    }
}
