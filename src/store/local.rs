//! On-disk object store for development and tests without a cloud account.
//!
//! Payloads live under `base_path/{bucket}/{shard}/{shard}/{key}`, the same
//! two-level MD5 sharding the old standalone store used. Signed URLs point
//! back at this service (`/objects/{bucket}/{key}`) and carry an
//! HMAC-SHA256 signature over the object path, expiry and response headers.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use md5::Context;
use sha2::Sha256;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::debug;
use uuid::Uuid;

use super::{
    ListObjectsRequest, ObjectListing, ObjectStoreClient, ObjectSummary, PresignRequest,
    RemoteMetadata, ResponseOverrides, StoreError, StoreResult, UploadOutcome,
};

type HmacSha256 = Hmac<Sha256>;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const COPY_CHUNK: usize = 64 * 1024;

pub struct LocalObjectStore {
    base_path: PathBuf,
    public_url: String,
    signing_key: String,
}

impl std::fmt::Debug for LocalObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalObjectStore")
            .field("base_path", &self.base_path)
            .field("public_url", &self.public_url)
            .finish()
    }
}

/// Everything a signed download link commits to.
#[derive(Clone, Debug)]
pub struct SignedDownload<'a> {
    pub bucket: &'a str,
    pub key: &'a str,
    /// Unix seconds after which the link is dead.
    pub expires_at: i64,
    pub content_type: &'a str,
    pub content_language: &'a str,
    pub content_disposition: &'a str,
    pub cache_control: &'a str,
    pub expires_header: &'a str,
}

impl LocalObjectStore {
    pub fn new(
        base_path: impl Into<PathBuf>,
        public_url: impl Into<String>,
        signing_key: impl Into<String>,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
            signing_key: signing_key.into(),
        }
    }

    /// Open an object's payload for streaming.
    pub async fn open(&self, bucket: &str, key: &str) -> StoreResult<(File, u64)> {
        ensure_key_safe(key)?;
        ensure_bucket_safe(bucket)?;
        let path = self.object_path(bucket, key);
        let file = File::open(&path).await.map_err(|err| not_found_or(err, bucket, key))?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    /// Check a signature produced by [`ObjectStoreClient::presign_get`].
    ///
    /// Expired links fail regardless of the signature.
    pub fn verify(&self, link: &SignedDownload<'_>, signature: &str, now: DateTime<Utc>) -> bool {
        if link.expires_at <= now.timestamp() {
            return false;
        }
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        match self.mac_for(link) {
            Some(mac) => mac.verify_slice(&expected).is_ok(),
            None => false,
        }
    }

    fn sign(&self, link: &SignedDownload<'_>) -> StoreResult<String> {
        let mac = self
            .mac_for(link)
            .ok_or_else(|| StoreError::Provider("invalid signing key".into()))?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn mac_for(&self, link: &SignedDownload<'_>) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.signing_key.as_bytes()).ok()?;
        let canonical = format!(
            "GET\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}",
            link.bucket,
            link.key,
            link.expires_at,
            link.content_type,
            link.content_language,
            link.content_disposition,
            link.cache_control,
            link.expires_header,
        );
        mac.update(canonical.as_bytes());
        Some(mac)
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// Generate two-level shard identifiers for an object key.
    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket, key);
        let mut path = self.bucket_root(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Collect every key stored in a bucket, sorted.
    ///
    /// Paths look like `{shard}/{shard}/{key...}`; temp files are skipped.
    async fn all_keys(&self, bucket: &str) -> StoreResult<Vec<String>> {
        let root = self.bucket_root(bucket);
        let mut keys = Vec::new();
        let mut pending = vec![root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                if entry.file_name().to_string_lossy().starts_with(".tmp-") {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .skip(2)
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                if !key.is_empty() {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn download_url(&self, link: &SignedDownload<'_>, signature: &str) -> String {
        let key_path = link
            .key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/objects/{}/{}?expires={}&response-content-type={}&response-content-language={}\
             &response-content-disposition={}&response-cache-control={}&response-expires={}\
             &signature={}",
            self.public_url,
            urlencoding::encode(link.bucket),
            key_path,
            link.expires_at,
            urlencoding::encode(link.content_type),
            urlencoding::encode(link.content_language),
            urlencoding::encode(link.content_disposition),
            urlencoding::encode(link.cache_control),
            urlencoding::encode(link.expires_header),
            signature,
        )
    }

    /// Recursively remove empty directories up to bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStoreClient for LocalObjectStore {
    async fn list_objects(&self, request: &ListObjectsRequest) -> StoreResult<ObjectListing> {
        ensure_bucket_safe(&request.bucket)?;
        let max_keys = request.max_keys.clamp(1, super::MAX_LIST_KEYS) as usize;
        let after = request
            .continuation
            .as_deref()
            .map(decode_continuation_token)
            .transpose()?;

        let mut page: Vec<String> = self
            .all_keys(&request.bucket)
            .await?
            .into_iter()
            .filter(|key| key.starts_with(&request.prefix))
            .filter(|key| after.as_ref().is_none_or(|after| key > after))
            .take(max_keys + 1)
            .collect();

        let truncated = page.len() > max_keys;
        if truncated {
            page.truncate(max_keys);
        }
        let next_continuation = if truncated {
            page.last().map(|key| encode_continuation_token(key))
        } else {
            None
        };

        let mut entries = Vec::with_capacity(page.len());
        for key in page {
            let meta = fs::metadata(self.object_path(&request.bucket, &key)).await?;
            entries.push(ObjectSummary {
                size: meta.len() as i64,
                last_modified: meta.modified().map(DateTime::<Utc>::from)?,
                key,
            });
        }

        Ok(ObjectListing {
            entries,
            next_continuation,
            truncated,
        })
    }

    async fn object_metadata(&self, bucket: &str, key: &str) -> StoreResult<RemoteMetadata> {
        let (mut file, len) = self.open(bucket, key).await?;
        let modified = file.metadata().await?.modified()?;

        let mut digest = Context::new();
        let mut buf = vec![0u8; COPY_CHUNK];
        loop {
            let read = file.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            digest.consume(&buf[..read]);
        }

        Ok(RemoteMetadata {
            size: len as i64,
            last_modified: DateTime::<Utc>::from(modified),
            request_id: Some(Uuid::new_v4().to_string()),
            version_id: None,
            checksum: Some(format!("{:x}", digest.compute())),
        })
    }

    /// Copy the staged file into place through a temp file, then rename.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        _size: u64,
    ) -> StoreResult<UploadOutcome> {
        ensure_key_safe(key)?;
        ensure_bucket_safe(bucket)?;

        let file_path = self.object_path(bucket, key);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::other("object path missing parent directory"))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let digest = match copy_with_digest(path, &tmp_path).await {
            Ok(digest) => digest,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err.into());
            }
        };
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        debug!(bucket, key, "stored object at {}", file_path.display());
        Ok(UploadOutcome {
            last_modified: Utc::now(),
            request_id: Some(Uuid::new_v4().to_string()),
            version_id: None,
            checksum: Some(digest),
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        ensure_key_safe(key)?;
        ensure_bucket_safe(bucket)?;
        let file_path = self.object_path(bucket, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(err.into()),
        }
        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.bucket_root(bucket)).await;
        }
        Ok(())
    }

    async fn presign_get(&self, request: &PresignRequest) -> StoreResult<String> {
        ensure_key_safe(&request.key)?;
        ensure_bucket_safe(&request.bucket)?;
        let ResponseOverrides {
            content_type,
            content_language,
            content_disposition,
            cache_control,
            ..
        } = &request.overrides;
        let expires_header = request.overrides.expires_header();
        let link = SignedDownload {
            bucket: &request.bucket,
            key: &request.key,
            expires_at: request.signature_expires.timestamp(),
            content_type,
            content_language,
            content_disposition,
            cache_control,
            expires_header: &expires_header,
        };
        let signature = self.sign(&link)?;
        Ok(self.download_url(&link, &signature))
    }
}

async fn copy_with_digest(from: &Path, to: &Path) -> io::Result<String> {
    let mut src = File::open(from).await?;
    let mut dst = File::create(to).await?;
    let mut digest = Context::new();
    let mut buf = vec![0u8; COPY_CHUNK];
    loop {
        let read = src.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        digest.consume(&buf[..read]);
        dst.write_all(&buf[..read]).await?;
    }
    dst.flush().await?;
    dst.sync_all().await?;
    Ok(format!("{:x}", digest.compute()))
}

/// Basic key validation to avoid trivial path traversal vectors.
fn ensure_key_safe(key: &str) -> StoreResult<()> {
    let invalid = key.is_empty()
        || key.len() > MAX_OBJECT_KEY_LEN
        || key.starts_with('/')
        || key.contains("..")
        || key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
    if invalid {
        return Err(StoreError::Provider(format!("invalid object key `{key}`")));
    }
    Ok(())
}

fn ensure_bucket_safe(bucket: &str) -> StoreResult<()> {
    if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket.contains("..") {
        return Err(StoreError::Provider(format!("invalid bucket `{bucket}`")));
    }
    Ok(())
}

fn not_found_or(err: io::Error, bucket: &str, key: &str) -> StoreError {
    if err.kind() == ErrorKind::NotFound {
        StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    } else {
        StoreError::Io(err)
    }
}

fn encode_continuation_token(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(key)
}

fn decode_continuation_token(token: &str) -> StoreResult<String> {
    URL_SAFE_NO_PAD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| StoreError::Provider(format!("invalid continuation token `{token}`")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("cos-sync-local-{}", Uuid::new_v4()))
    }

    async fn stage(dir: &Path, body: &[u8]) -> (PathBuf, u64) {
        fs::create_dir_all(dir).await.unwrap();
        let path = dir.join(format!("staged-{}", Uuid::new_v4()));
        fs::write(&path, body).await.unwrap();
        (path, body.len() as u64)
    }

    fn overrides(now: DateTime<Utc>) -> ResponseOverrides {
        ResponseOverrides {
            content_type: "image/png".into(),
            content_language: "zh-CN".into(),
            content_disposition: "filename=cat.png".into(),
            cache_control: "no-cache".into(),
            expires: now + Duration::hours(24),
        }
    }

    #[tokio::test]
    async fn put_list_head_delete() {
        let dir = scratch_dir();
        let store = LocalObjectStore::new(dir.join("objects"), "http://localhost:3000", "k");

        for key in ["bob/b.txt", "alice/a.png", "alice/c.jpg"] {
            let (staged, size) = stage(&dir.join("staging"), key.as_bytes()).await;
            let outcome = store.put_object("photos", key, &staged, size).await.unwrap();
            assert_eq!(
                outcome.checksum.as_deref(),
                Some(format!("{:x}", md5::compute(key)).as_str())
            );
        }

        let mut request = ListObjectsRequest::whole_bucket("photos");
        request.max_keys = 2;
        let first = store.list_objects(&request).await.unwrap();
        let keys: Vec<_> = first.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["alice/a.png", "alice/c.jpg"]);
        assert!(first.truncated);

        request.continuation = first.next_continuation;
        let second = store.list_objects(&request).await.unwrap();
        assert_eq!(second.entries.len(), 1);
        assert_eq!(second.entries[0].key, "bob/b.txt");
        assert!(!second.truncated);
        assert!(second.next_continuation.is_none());

        let meta = store.object_metadata("photos", "bob/b.txt").await.unwrap();
        assert_eq!(meta.size, "bob/b.txt".len() as i64);

        store.delete_object("photos", "bob/b.txt").await.unwrap();
        assert!(matches!(
            store.object_metadata("photos", "bob/b.txt").await,
            Err(StoreError::NotFound { .. })
        ));

        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn listing_missing_bucket_is_empty() {
        let store = LocalObjectStore::new(scratch_dir(), "http://localhost:3000", "k");
        let listing = store
            .list_objects(&ListObjectsRequest::whole_bucket("nothing-here"))
            .await
            .unwrap();
        assert!(listing.entries.is_empty());
        assert!(!listing.truncated);
    }

    #[tokio::test]
    async fn presigned_links_verify_until_expiry() {
        let store = LocalObjectStore::new(scratch_dir(), "http://localhost:3000/", "secret");
        let now = Utc::now();
        let request = PresignRequest {
            bucket: "photos".into(),
            key: "alice/my cat.png".into(),
            signature_expires: now + Duration::seconds(60),
            overrides: overrides(now),
        };
        let url = store.presign_get(&request).await.unwrap();
        assert!(url.starts_with("http://localhost:3000/objects/photos/alice/my%20cat.png?"));

        let signature = url.rsplit("signature=").next().unwrap();
        let expires_header = request.overrides.expires_header();
        let link = SignedDownload {
            bucket: "photos",
            key: "alice/my cat.png",
            expires_at: request.signature_expires.timestamp(),
            content_type: "image/png",
            content_language: "zh-CN",
            content_disposition: "filename=cat.png",
            cache_control: "no-cache",
            expires_header: &expires_header,
        };
        assert!(store.verify(&link, signature, now));
        assert!(!store.verify(&link, signature, now + Duration::seconds(61)));

        let tampered = SignedDownload {
            content_type: "text/html",
            ..link.clone()
        };
        assert!(!store.verify(&tampered, signature, now));
        assert!(!store.verify(&link, "not-hex", now));
    }

    #[test]
    fn unsafe_keys_are_rejected() {
        assert!(ensure_key_safe("alice/a.png").is_ok());
        assert!(ensure_key_safe("").is_err());
        assert!(ensure_key_safe("/etc/passwd").is_err());
        assert!(ensure_key_safe("a/../../b").is_err());
        assert!(ensure_bucket_safe("../x").is_err());
    }
}
