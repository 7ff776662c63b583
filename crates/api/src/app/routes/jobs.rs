use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use scribe_core::{CorrelationId, JobId, MeetingRef};
use scribe_infra::jobs::{Job, JobStatus, JobStore};

use crate::app::dto::{self, EnqueuedJob, JobView};
use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(submit_job).get(list_jobs))
        .route("/:id", get(get_job))
        .route("/:id/retry", post(retry_job))
}

/// Manual submission of one meeting.
pub async fn submit_job(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::SubmitJobRequest>,
) -> axum::response::Response {
    let payload = match MeetingRef::new(body.meeting_id, body.chat_id, body.user_id) {
        Ok(p) => p,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
    };

    let correlation_id = CorrelationId::new();
    match services.store.enqueue(Job::new(payload, correlation_id)).await {
        Ok(id) => {
            tracing::info!(job_id = %id, correlation_id = %correlation_id, "job submitted");
            (StatusCode::ACCEPTED, Json(EnqueuedJob { id, correlation_id })).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.store.get(id).await {
        Ok(Some(job)) => Json(JobView::from(job)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found")),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListJobsQuery>,
) -> axum::response::Response {
    let status = match query.status.as_deref().map(str::parse::<JobStatus>).transpose() {
        Ok(s) => s,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_status", e),
    };
    let limit = query
        .limit
        .unwrap_or(dto::DEFAULT_LIST_LIMIT)
        .clamp(1, dto::MAX_LIST_LIMIT);

    match services.store.list_by_status(status, limit).await {
        Ok(jobs) => {
            let items: Vec<JobView> = jobs.into_iter().map(JobView::from).collect();
            Json(serde_json::json!({ "count": items.len(), "jobs": items })).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Put a dead-lettered job back on the queue.
pub async fn retry_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.store.requeue_failed(id).await {
        Ok(job) => {
            tracing::info!(job_id = %id, correlation_id = %job.correlation_id, "job re-queued");
            Json(JobView::from(job)).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

fn parse_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"))
}
