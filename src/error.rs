//! Error kinds for the extraction engine (§7) and the HTTP gateway boundary.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Errors surfaced by the engine (C1-C7). Per-USN failures mostly stay internal to
/// the Coordinator's counters; these variants are for failures that abort a whole
/// operation (subject discovery, reconciliation lookups).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("external service unavailable: {0}")]
    ExternalUnavailable(String),

    #[error("USN not recognized by the portal")]
    PortalInvalidUsn,

    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    #[error("no subject row found for code {0:?} in this semester")]
    SubjectNotFound(String),

    #[error("{0}")]
    Fatal(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Errors surfaced at the HTTP boundary (C8), mapped to a status code + JSON body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("scrape failed: {0}")]
    ScrapeFailed(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::PortalInvalidUsn => ApiError::ScrapeFailed(err.to_string()),
            EngineError::ExternalUnavailable(_) | EngineError::TransientNetwork(_) => {
                ApiError::ScrapeFailed(err.to_string())
            }
            EngineError::SubjectNotFound(_) => ApiError::NotFound(err.to_string()),
            EngineError::Fatal(_) => ApiError::ScrapeFailed(err.to_string()),
            EngineError::Database(e) => ApiError::Database(e),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ScrapeFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if matches!(status, StatusCode::INTERNAL_SERVER_ERROR) {
            tracing::error!(error = ?self, "request failed");
        }

        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}
