use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use scribe_infra::jobs::JobStoreError;

pub fn store_error_to_response(err: JobStoreError) -> axum::response::Response {
    match err {
        JobStoreError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found"))
        }
        JobStoreError::AlreadyExists(_) => json_error(StatusCode::CONFLICT, "conflict", err.to_string()),
        JobStoreError::InvalidState { .. } => {
            json_error(StatusCode::CONFLICT, "invalid_state", err.to_string())
        }
        JobStoreError::LeaseLost(_) | JobStoreError::Storage(_) => {
            tracing::error!(error = %err, "job store request failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string())
        }
    }
}

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
