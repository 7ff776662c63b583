//! Collaborator contracts used by the meeting processor.
//!
//! Each remote system sits behind one of these traits so the processor can be
//! driven by in-process fakes in tests.

use core::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use scribe_core::{CorrelationId, JobId, MeetingContext};
use scribe_minutes::{Document, StructuredMinutes};

use crate::external::CallError;
use crate::jobs::{JobStore, JobStoreError};

/// Per-attempt call context: the access token and the correlation id every
/// outbound request carries.
#[derive(Clone)]
pub struct CallContext {
    pub access_token: String,
    pub correlation_id: CorrelationId,
}

impl CallContext {
    pub fn new(access_token: impl Into<String>, correlation_id: CorrelationId) -> Self {
        Self {
            access_token: access_token.into(),
            correlation_id,
        }
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("access_token", &"<redacted>")
            .field("correlation_id", &self.correlation_id)
            .finish()
    }
}

/// A published transcript of a meeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptRef {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait MeetingDirectory: Send + Sync {
    async fn meeting_context(
        &self,
        ctx: &CallContext,
        user_id: &str,
        meeting_id: &str,
    ) -> Result<MeetingContext, CallError>;
}

#[async_trait]
pub trait TranscriptSource: Send + Sync {
    /// Transcripts published so far; empty while none is available.
    async fn list_transcripts(
        &self,
        ctx: &CallContext,
        user_id: &str,
        meeting_id: &str,
    ) -> Result<Vec<TranscriptRef>, CallError>;

    /// Raw transcript content (WebVTT).
    async fn transcript_content(
        &self,
        ctx: &CallContext,
        user_id: &str,
        meeting_id: &str,
        transcript_id: &str,
    ) -> Result<String, CallError>;
}

#[async_trait]
pub trait MinutesGenerator: Send + Sync {
    async fn generate(
        &self,
        correlation_id: CorrelationId,
        transcript: &str,
        context: &MeetingContext,
    ) -> Result<StructuredMinutes, CallError>;
}

#[async_trait]
pub trait ChatDelivery: Send + Sync {
    async fn post_message(
        &self,
        ctx: &CallContext,
        chat_id: &str,
        document: &Document,
    ) -> Result<(), CallError>;
}

/// Records that a job's minutes were delivered, so re-deliveries of the same
/// job do not post twice.
#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    async fn record_delivery(&self, job_id: JobId) -> Result<(), JobStoreError>;

    /// Whether any attempt of the job has already posted its minutes.
    async fn is_delivered(&self, job_id: JobId) -> Result<bool, JobStoreError>;
}

#[async_trait]
impl<S: JobStore> DeliveryLedger for S {
    async fn record_delivery(&self, job_id: JobId) -> Result<(), JobStoreError> {
        self.mark_delivered(job_id).await
    }

    async fn is_delivered(&self, job_id: JobId) -> Result<bool, JobStoreError> {
        Ok(self
            .get(job_id)
            .await?
            .is_some_and(|job| job.delivered_at.is_some()))
    }
}
