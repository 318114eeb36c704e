//! Health & readiness handlers.
//!
//! - GET /healthz  -> liveness, no I/O
//! - GET /readyz   -> SQLite reachable and the staging directory writable

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::BTreeMap, path::Path};
use tokio::fs;
use uuid::Uuid;

use crate::state::AppState;

/// `GET /healthz`
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`
///
/// HTTP 200 when every check passes, 503 otherwise; the body lists each check.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let sqlite = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.service.db)
        .await
    {
        Ok(1) => CheckStatus::ok(),
        Ok(v) => CheckStatus::failed(format!("unexpected result: {}", v)),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    };
    let staging = disk_check(&state.service.settings.staging_dir).await;

    let overall_ok = sqlite.ok && staging.ok;
    let mut checks = BTreeMap::new();
    checks.insert("sqlite", sqlite);
    checks.insert("staging", staging);

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" },
        checks,
    };
    (status, Json(body))
}

/// Write, read back and remove a probe file under `dir`.
async fn disk_check(dir: &Path) -> CheckStatus {
    if let Err(e) = fs::create_dir_all(dir).await {
        return CheckStatus::failed(format!("could not create {}: {}", dir.display(), e));
    }
    let probe = dir.join(format!(".readyz-{}", Uuid::new_v4()));
    let result = match fs::write(&probe, b"readyz").await {
        Ok(()) => match fs::read(&probe).await {
            Ok(bytes) if bytes == b"readyz" => CheckStatus::ok(),
            Ok(_) => CheckStatus::failed("file content mismatch".into()),
            Err(e) => CheckStatus::failed(format!("could not read probe file: {}", e)),
        },
        Err(e) => return CheckStatus::failed(format!("could not write probe file: {}", e)),
    };
    if let Err(e) = fs::remove_file(&probe).await {
        tracing::warn!("could not remove readiness probe {}: {}", probe.display(), e);
    }
    result
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self { ok: true, error: None }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}
