//! Shared HTTP plumbing for both services
//!
//! CORS with an origin allow-list, slow-request logging, and the single
//! error shape every route speaks: `{"error": "<message>"}` plus a status
//! code. Hardware and storage errors map onto statuses here so handlers
//! can use `?` throughout.

pub mod data_api;
pub mod hardware_api;

use std::time::Instant;

use axum::extract::Request;
use axum::http::{header, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::hardware::HardwareError;
use crate::jobs::JobError;
use crate::storage::StorageError;

/// Result type for HTTP handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Error surfaced at the HTTP boundary
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<HardwareError> for ApiError {
    fn from(err: HardwareError) -> Self {
        match err {
            HardwareError::UnknownDevice(_) | HardwareError::InvalidInput(_) => {
                ApiError::BadRequest(err.to_string())
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => ApiError::NotFound("record not found".into()),
            StorageError::Sqlite(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::InvalidInput(msg) => ApiError::BadRequest(msg),
            JobError::Hardware(msg) => ApiError::Internal(msg),
            JobError::Storage(e) => e.into(),
        }
    }
}

/// CORS layer echoing the Origin back only when it is allow-listed
pub fn cors_layer(allowed_origins: Vec<String>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            origin
                .to_str()
                .map(|o| allowed_origins.iter().any(|allowed| allowed == o))
                .unwrap_or(false)
        }))
        .allow_methods([
            Method::GET,
            Method::PUT,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

/// Log any request taking longer than a second
pub async fn track_request_time(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    if elapsed.as_secs_f64() > 1.0 {
        tracing::warn!(
            "Slow request: {} {} took {:.2}s",
            method,
            path,
            elapsed.as_secs_f64()
        );
    }
    response
}
