/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! API error type. Every handler failure is an [`ApiError`] carrying one of
//! the stable error kinds; the response body is `{"error": KIND, "detail"}`
//! with the kind's mapped status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tom_models::ErrorKind;
use tom_store::StoreError;

#[derive(Debug, Clone)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, detail)
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Plain-text response for raw-output mode, same status mapping.
    pub fn into_plain_response(self) -> Response {
        (self.status(), self.detail).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.kind.label(),
            "detail": self.detail,
        });
        (self.status(), Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::JobNotFound(id) => ApiError::not_found(format!("job {} not found", id)),
            other => ApiError::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_kind() {
        assert_eq!(
            ApiError::validation("x").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::new(ErrorKind::AuthDenied, "x").status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::new(ErrorKind::TimeoutError, "x").status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn store_not_found_maps_to_404() {
        let err: ApiError = StoreError::JobNotFound("j1".into()).into();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
