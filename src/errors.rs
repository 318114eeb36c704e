use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::services::ServiceError;

/// HTTP-facing error: a status plus a message rendered as JSON.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), "{}", self.message);
        }
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::ConfigurationMissing
            | ServiceError::InvalidConfiguration(_)
            | ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::RecordNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::StorageProvider(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Sqlx(_) | ServiceError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_errors_map_to_statuses() {
        let cases = [
            (ServiceError::ConfigurationMissing, StatusCode::BAD_REQUEST),
            (ServiceError::PayloadTooLarge { limit_mb: 10 }, StatusCode::PAYLOAD_TOO_LARGE),
            (ServiceError::InvalidConfiguration("host".into()), StatusCode::BAD_REQUEST),
            (ServiceError::StorageProvider("NoSuchBucket".into()), StatusCode::BAD_GATEWAY),
            (ServiceError::RecordNotFound("42".into()), StatusCode::NOT_FOUND),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }

        let provider = AppError::from(ServiceError::StorageProvider("NoSuchBucket".into()));
        assert_eq!(provider.message, "NoSuchBucket");
    }
}
