//! Short-lived download URLs with browser-facing response headers.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

use super::ServiceResult;
use crate::{
    models::ObjectRecord,
    store::{ObjectStoreClient, PresignRequest, ResponseOverrides, with_deadline},
};

/// Seconds the signature is accepted for.
pub const SIGNATURE_TTL_SECS: i64 = 60;
/// Hours from issuance to the `Expires` response header.
pub const CACHE_EXPIRY_HOURS: i64 = 24;
pub const CONTENT_LANGUAGE: &str = "zh-CN";
pub const CACHE_CONTROL: &str = "no-cache";

const IMAGE_SUFFIXES: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "webp", "tif", "tiff", "ico", "avif", "heic",
];

/// Media type announced for a stored suffix.
///
/// Image suffixes become `image/<suffix>` with the suffix kept as stored;
/// everything else gets its registered type or `application/octet-stream`.
pub fn content_type_for(suffix: &str) -> String {
    let lower = suffix.to_ascii_lowercase();
    if IMAGE_SUFFIXES.contains(&lower.as_str()) {
        return format!("image/{suffix}");
    }
    let known = match lower.as_str() {
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "htm" | "html" => "text/html",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    };
    known.to_string()
}

/// Build the presign request for `record` as issued at `now`.
pub fn request_for(record: &ObjectRecord, now: DateTime<Utc>) -> PresignRequest {
    PresignRequest {
        bucket: record.bucket_name.clone(),
        key: record.key.clone(),
        signature_expires: now + ChronoDuration::seconds(SIGNATURE_TTL_SECS),
        overrides: ResponseOverrides {
            content_type: content_type_for(&record.suffix),
            content_language: CONTENT_LANGUAGE.to_string(),
            content_disposition: format!("filename={}", record.file_name),
            cache_control: CACHE_CONTROL.to_string(),
            expires: now + ChronoDuration::hours(CACHE_EXPIRY_HOURS),
        },
    }
}

pub async fn issue_url(
    client: &dyn ObjectStoreClient,
    record: &ObjectRecord,
    deadline: Duration,
) -> ServiceResult<String> {
    let request = request_for(record, Utc::now());
    let url = with_deadline(deadline, client.presign_get(&request)).await?;
    tracing::debug!(key = %record.key, expires = %request.signature_expires, "issued signed url");
    Ok(url)
}
