//! JSON endpoints for bucket configuration and object records.

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::USER_HEADER;
use crate::{
    errors::AppError,
    models::{ObjectRecord, Page, RecordQuery, StorageConfig},
    services::SyncReport,
    state::AppState,
};

/// Shape the rich-text editor expects back from an upload.
#[derive(Serialize, Debug)]
pub struct UploadResponse {
    pub id: Uuid,
    pub errno: u8,
    pub data: Vec<String>,
}

/// `GET /api/cosContent/config`
pub async fn get_config(State(state): State<AppState>) -> Result<Json<StorageConfig>, AppError> {
    Ok(Json(state.service.find_config().await?))
}

/// `PUT /api/cosContent/config`
pub async fn put_config(
    State(state): State<AppState>,
    Json(config): Json<StorageConfig>,
) -> Result<Json<StorageConfig>, AppError> {
    Ok(Json(state.service.configure(config).await?))
}

/// `GET /api/cosContent`
pub async fn list_records(
    State(state): State<AppState>,
    Query(query): Query<RecordQuery>,
) -> Result<Json<Page<ObjectRecord>>, AppError> {
    Ok(Json(state.service.list_records(&query).await?))
}

/// `POST /api/cosContent` with a multipart `file` field.
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let identity = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::new(err.status(), err.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| AppError::new(err.status(), err.body_text()))?;
        upload = Some((file_name, bytes));
        break;
    }
    let Some((file_name, bytes)) = upload else {
        return Err(AppError::bad_request("multipart field `file` is required"));
    };

    let record = state.service.upload(bytes, &file_name, &identity).await?;
    // The object is stored at this point; a signing failure only leaves `data` empty.
    let data = match state.service.issue_url(&record).await {
        Ok(url) => vec![url],
        Err(err) => {
            tracing::warn!(key = %record.key, id = %record.id, "uploaded but could not sign url: {err}");
            Vec::new()
        }
    };
    Ok(Json(UploadResponse {
        id: record.id,
        errno: 0,
        data,
    }))
}

/// `POST /api/cosContent/synchronize`
pub async fn synchronize(State(state): State<AppState>) -> Result<Json<SyncReport>, AppError> {
    Ok(Json(state.service.synchronize().await?))
}

/// `GET /api/cosContent/download/{id}`
pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let url = state.service.issue_url_by_id(&id).await?;
    Ok(Json(json!({ "url": url })))
}

/// `DELETE /api/cosContent/{id}`
pub async fn delete_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.service.delete_by_id(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /api/cosContent` with a JSON array of ids.
pub async fn delete_many(
    State(state): State<AppState>,
    Json(ids): Json<Vec<String>>,
) -> Result<impl IntoResponse, AppError> {
    let deleted = state.service.delete_all(&ids).await?;
    Ok(Json(json!({ "deleted": deleted })))
}
