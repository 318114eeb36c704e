//! Routes for the COS content API, local signed downloads and probes.
//!
//! ## Structure
//! - **Configuration**
//!   - `GET    /api/cosContent/config` — current config (empty default if none)
//!   - `PUT    /api/cosContent/config` — save config, align record visibility
//!
//! - **Records**
//!   - `GET    /api/cosContent` — paged records (`fileName`, `updatedFrom`, `updatedTo`, `page`, `size`)
//!   - `POST   /api/cosContent` — multipart upload (`file` field)
//!   - `DELETE /api/cosContent` — delete every id in the JSON array body
//!   - `DELETE /api/cosContent/{id}` — delete one record and its object
//!   - `GET    /api/cosContent/download/{id}` — signed download URL
//!   - `POST   /api/cosContent/synchronize` — reconcile records with the bucket
//!
//! - **Local backend**
//!   - `GET    /objects/{bucket}/{*key}` — serve a signed download
//!
//! The wildcard `*key` allows nested keys like `alice/2025/img.jpg`.

use crate::{
    handlers::{
        cos_handlers::{
            delete_many, delete_one, download, get_config, list_records, put_config,
            synchronize, upload,
        },
        health_handlers::{healthz, readyz},
        object_handlers::download_object,
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};

/// Room left for multipart boundaries and part headers above the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the router. Request bodies are capped a little above `max_upload_bytes`
/// so oversized files still reach the service's own size check.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/cosContent/config", get(get_config).put(put_config))
        .route("/api/cosContent/synchronize", post(synchronize))
        .route("/api/cosContent/download/{id}", get(download))
        .route("/api/cosContent/{id}", delete(delete_one))
        .route(
            "/api/cosContent",
            get(list_records).post(upload).delete(delete_many),
        )
        .route("/objects/{bucket}/{*key}", get(download_object))
        .layer(DefaultBodyLimit::max(
            max_upload_bytes.saturating_add(MULTIPART_OVERHEAD),
        ))
}
