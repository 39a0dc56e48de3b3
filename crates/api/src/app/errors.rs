use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use kiln_infra::{ArtifactError, QueueError};

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// The one not-found body. Unknown paths and access rejections both use it.
pub fn not_found() -> axum::response::Response {
    json_error(StatusCode::NOT_FOUND, "not_found", "not found")
}

pub fn queue_error_to_response(err: QueueError) -> axum::response::Response {
    match err {
        QueueError::Validation(e) => json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
        QueueError::InvalidDependency(_) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_dependency", err.to_string())
        }
        QueueError::InvalidStatus(_) => json_error(StatusCode::BAD_REQUEST, "invalid_status", err.to_string()),
        QueueError::NotFound(_) | QueueError::UnknownToken => {
            json_error(StatusCode::NOT_FOUND, "not_found", err.to_string())
        }
        QueueError::ClaimConcluded => json_error(StatusCode::NOT_FOUND, "claim_concluded", err.to_string()),
        QueueError::InvalidTransition { .. } => {
            json_error(StatusCode::CONFLICT, "invalid_transition", err.to_string())
        }
        QueueError::Store(e) => {
            error!(error = %e, "job store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_unavailable", "job store unavailable")
        }
    }
}

pub fn artifact_error_to_response(err: ArtifactError) -> axum::response::Response {
    match err {
        ArtifactError::AlreadyExists { .. } => json_error(StatusCode::CONFLICT, "artifact_exists", err.to_string()),
        ArtifactError::NotFound { .. } | ArtifactError::Unconfigured => not_found(),
        ArtifactError::Io(e) => {
            error!(error = %e, "artifact write failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "artifact_io", "artifact could not be stored")
        }
    }
}

pub fn invalid_token() -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid dispatch token")
}
