//! Signed downloads for the local object store.
//! Streams object bodies to avoid buffering in memory; the link's signature
//! is checked against every response header it asks for.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::Response,
};
use chrono::Utc;
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use crate::{
    dates,
    errors::AppError,
    state::AppState,
    store::{StoreError, local::SignedDownload},
};

/// Query string produced by the local store's presigner.
#[derive(Debug, Deserialize)]
pub struct SignedDownloadQuery {
    pub expires: i64,
    #[serde(rename = "response-content-type")]
    pub content_type: String,
    #[serde(rename = "response-content-language")]
    pub content_language: String,
    #[serde(rename = "response-content-disposition")]
    pub content_disposition: String,
    #[serde(rename = "response-cache-control")]
    pub cache_control: String,
    #[serde(rename = "response-expires")]
    pub expires_header: String,
    pub signature: String,
}

/// `GET /objects/{bucket}/{*key}`
pub async fn download_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<SignedDownloadQuery>,
) -> Result<Response, AppError> {
    let Some(store) = state.local.as_ref() else {
        return Err(AppError::not_found("objects are not served by this instance"));
    };

    let link = SignedDownload {
        bucket: &bucket,
        key: &key,
        expires_at: q.expires,
        content_type: &q.content_type,
        content_language: &q.content_language,
        content_disposition: &q.content_disposition,
        cache_control: &q.cache_control,
        expires_header: &q.expires_header,
    };
    if !store.verify(&link, &q.signature, Utc::now()) {
        return Err(AppError::forbidden("signature is invalid or expired"));
    }
    dates::parse_rfc822(&q.expires_header)
        .map_err(|err| AppError::bad_request(format!("response-expires: {}", err)))?;

    let (file, len) = store.open(&bucket, &key).await.map_err(|err| match err {
        StoreError::NotFound { .. } => AppError::not_found(err.to_string()),
        other => AppError::internal(other.to_string()),
    })?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    *response.status_mut() = StatusCode::OK;
    set_download_headers(response.headers_mut(), &link, len);
    Ok(response)
}

fn set_download_headers(headers: &mut HeaderMap, link: &SignedDownload<'_>, len: u64) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(link.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));

    // File names may be non-ASCII; from_bytes keeps them as opaque header bytes.
    let passthrough: [(HeaderName, &str); 4] = [
        (header::CONTENT_LANGUAGE, link.content_language),
        (header::CONTENT_DISPOSITION, link.content_disposition),
        (header::CACHE_CONTROL, link.cache_control),
        (header::EXPIRES, link.expires_header),
    ];
    for (name, value) in passthrough {
        if let Ok(value) = HeaderValue::from_bytes(value.as_bytes()) {
            headers.insert(name, value);
        }
    }
}
