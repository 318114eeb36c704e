//! Bucket reconciliation.
//!
//! Walks the remote listing one page at a time and inserts a record for
//! every object whose key is not yet known locally for that bucket. Each insert commits on
//! its own, so a run that fails halfway keeps what it already recorded and
//! a retry picks up from there: known keys are skipped.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ServiceError, ServiceResult};
use crate::{
    dates, files,
    models::{ObjectRecord, StorageConfig},
    repository::RecordRepository,
    store::{ListObjectsRequest, ObjectStoreClient, ObjectSummary, RemoteMetadata, with_deadline},
};

/// Counters for one synchronization run.
#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pages: u32,
    pub scanned: u64,
    pub inserted: u64,
    pub skipped: u64,
}

pub async fn synchronize(
    records: &RecordRepository,
    client: &dyn ObjectStoreClient,
    config: &StorageConfig,
    deadline: Duration,
) -> ServiceResult<SyncReport> {
    if !config.is_persisted() {
        return Err(ServiceError::ConfigurationMissing);
    }

    let mut report = SyncReport::default();
    let mut request = ListObjectsRequest::whole_bucket(&config.bucket_name);

    loop {
        let page = with_deadline(deadline, client.list_objects(&request))
            .await
            .inspect_err(|e| {
                warn!(bucket = %config.bucket_name, page = report.pages + 1, "listing failed: {e}")
            })?;
        report.pages += 1;
        debug!(
            page = report.pages,
            entries = page.entries.len(),
            truncated = page.truncated,
            "listed bucket page"
        );

        for entry in &page.entries {
            report.scanned += 1;
            if records
                .find_by_key(&config.bucket_name, &entry.key)
                .await?
                .is_some()
            {
                report.skipped += 1;
                continue;
            }

            let metadata = with_deadline(
                deadline,
                client.object_metadata(&config.bucket_name, &entry.key),
            )
            .await?;
            debug!(
                key = %entry.key,
                size = metadata.size,
                modified = %metadata.last_modified,
                "recording unknown object"
            );

            if records
                .insert_if_absent(&record_for(config, entry, &metadata))
                .await?
            {
                report.inserted += 1;
            } else {
                // Inserted concurrently by an upload since the lookup.
                report.skipped += 1;
            }
        }

        if !page.truncated {
            break;
        }
        match page.next_continuation {
            Some(token) => request.continuation = Some(token),
            None => {
                return Err(ServiceError::StorageProvider(
                    "listing reported more pages without a continuation token".into(),
                ));
            }
        }
    }

    info!(
        bucket = %config.bucket_name,
        pages = report.pages,
        scanned = report.scanned,
        inserted = report.inserted,
        skipped = report.skipped,
        "bucket synchronized"
    );
    Ok(report)
}

fn record_for(config: &StorageConfig, entry: &ObjectSummary, metadata: &RemoteMetadata) -> ObjectRecord {
    let file_name = files::file_name_of(&entry.key);
    ObjectRecord {
        id: Uuid::new_v4(),
        key: entry.key.clone(),
        file_name: file_name.to_string(),
        file_size: entry.size,
        suffix: files::suffix_of(file_name).to_string(),
        bucket_name: config.bucket_name.clone(),
        visibility: config.visibility,
        updated_at: dates::truncate_to_seconds(entry.last_modified),
        request_id: metadata.request_id.clone(),
        version_id: metadata.version_id.clone(),
        checksum: metadata.checksum.clone(),
    }
}
