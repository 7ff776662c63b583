use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Query},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};

use scribe_core::{CorrelationId, MeetingRef};
use scribe_infra::config::WebhookValidation;
use scribe_infra::jobs::{Job, JobStore, JobStoreError};

use crate::app::dto::{self, ChangeNotification, EnqueuedJob, IngestSummary, NotificationBatch};
use crate::app::errors;
use crate::app::services::AppServices;

enum Verdict {
    Accept(MeetingRef),
    Reject,
    Skip,
}

/// Meeting-ended notifications in, queued jobs out.
///
/// A `validationToken` query parameter is the subscription handshake and is
/// echoed back as plain text.
pub async fn receive(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::WebhookQuery>,
    body: Bytes,
) -> axum::response::Response {
    if let Some(token) = query.validation_token {
        tracing::info!("webhook subscription validation");
        return (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], token).into_response();
    }

    let batch: NotificationBatch = match serde_json::from_slice(&body) {
        Ok(b) => b,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", e.to_string());
        }
    };

    let mut summary = IngestSummary::default();
    for notification in batch.value {
        match verdict(&services.webhook, notification) {
            Verdict::Accept(payload) => {
                let meeting_id = payload.meeting_id.clone();
                let job = Job::for_meeting(payload, CorrelationId::new());
                let enqueued = match enqueue_once(services.store.as_ref(), job).await {
                    Ok(enqueued) => enqueued,
                    Err(e) => {
                        tracing::error!(error = %e, meeting_id = %meeting_id, "failed to enqueue job");
                        return errors::json_error(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "enqueue_failed",
                            e.to_string(),
                        );
                    }
                };
                summary.accepted += 1;
                summary.jobs.push(enqueued);
            }
            Verdict::Reject => summary.rejected += 1,
            Verdict::Skip => summary.skipped += 1,
        }
    }

    (StatusCode::ACCEPTED, Json(summary)).into_response()
}

/// Enqueue `job`; a job already stored for the same meeting counts as enqueued.
async fn enqueue_once(store: &dyn JobStore, job: Job) -> Result<EnqueuedJob, JobStoreError> {
    let (id, correlation_id) = (job.id, job.correlation_id);
    let meeting_id = job.payload.meeting_id.clone();

    match store.enqueue(job).await {
        Ok(id) => {
            tracing::info!(
                job_id = %id,
                correlation_id = %correlation_id,
                meeting_id = %meeting_id,
                "job enqueued"
            );
            Ok(EnqueuedJob { id, correlation_id })
        }
        Err(JobStoreError::AlreadyExists(_)) => {
            let existing = store.get(id).await?.ok_or(JobStoreError::NotFound(id))?;
            tracing::info!(
                job_id = %id,
                correlation_id = %existing.correlation_id,
                meeting_id = %meeting_id,
                status = %existing.status,
                "job already exists for meeting"
            );
            Ok(EnqueuedJob {
                id,
                correlation_id: existing.correlation_id,
            })
        }
        Err(e) => Err(e),
    }
}

fn verdict(validation: &WebhookValidation, notification: ChangeNotification) -> Verdict {
    if let Some(event) = notification.lifecycle_event.as_deref() {
        tracing::info!(
            lifecycle_event = event,
            subscription_id = notification.subscription_id.as_deref().unwrap_or(""),
            "lifecycle notification skipped"
        );
        return Verdict::Skip;
    }

    if let WebhookValidation::Required { client_state } = validation {
        if notification.client_state.as_deref() != Some(client_state.expose()) {
            tracing::warn!(
                subscription_id = notification.subscription_id.as_deref().unwrap_or(""),
                "notification rejected: clientState mismatch"
            );
            return Verdict::Reject;
        }
    }

    let data = notification.resource_data.unwrap_or_default();
    let (Some(meeting_id), Some(chat_id), Some(user_id)) =
        (data.meeting_id, data.chat_id, data.organizer_id)
    else {
        tracing::warn!(
            change_type = notification.change_type.as_deref().unwrap_or(""),
            "notification skipped: missing meetingId, chatId or organizerId"
        );
        return Verdict::Skip;
    };

    match MeetingRef::new(meeting_id, chat_id, user_id) {
        Ok(payload) => Verdict::Accept(payload),
        Err(e) => {
            tracing::warn!(error = %e, "notification skipped");
            Verdict::Skip
        }
    }
}
