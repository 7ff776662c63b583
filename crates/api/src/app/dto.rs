use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scribe_core::{CorrelationId, JobId};
use scribe_infra::jobs::{Job, JobAttemptRecord, JobStatus};

// -------------------------
// Webhook notifications
// -------------------------

#[derive(Debug, Deserialize)]
pub struct WebhookQuery {
    #[serde(rename = "validationToken")]
    pub validation_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationBatch {
    #[serde(default)]
    pub value: Vec<ChangeNotification>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    pub subscription_id: Option<String>,
    pub client_state: Option<String>,
    pub change_type: Option<String>,
    pub lifecycle_event: Option<String>,
    pub resource_data: Option<ResourceData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceData {
    pub meeting_id: Option<String>,
    pub chat_id: Option<String>,
    pub organizer_id: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct IngestSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub skipped: usize,
    pub jobs: Vec<EnqueuedJob>,
}

#[derive(Debug, Serialize)]
pub struct EnqueuedJob {
    pub id: JobId,
    pub correlation_id: CorrelationId,
}

// -------------------------
// Jobs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(alias = "meetingId")]
    pub meeting_id: String,
    #[serde(alias = "chatId")]
    pub chat_id: String,
    #[serde(alias = "userId")]
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 500;

#[derive(Debug, Serialize)]
pub struct JobView {
    pub id: JobId,
    pub correlation_id: CorrelationId,
    pub meeting_id: String,
    pub chat_id: String,
    pub user_id: String,
    pub status: JobStatus,
    pub attempts_made: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub history: Vec<JobAttemptRecord>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            correlation_id: job.correlation_id,
            meeting_id: job.payload.meeting_id,
            chat_id: job.payload.chat_id,
            user_id: job.payload.user_id,
            status: job.status,
            attempts_made: job.attempts_made,
            last_error: job.last_error,
            created_at: job.created_at,
            updated_at: job.updated_at,
            scheduled_at: job.scheduled_at,
            delivered_at: job.delivered_at,
            history: job.history,
        }
    }
}
