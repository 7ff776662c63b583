//! Meeting processor: one job attempt, from meeting lookup to posted minutes.
//!
//! An attempt walks a fixed sequence of stages. Any stage failure ends the
//! attempt with a [`ProcessError`] naming the stage; the queue decides whether
//! the job is re-delivered.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use scribe_core::{CorrelationId, MeetingContext};
use scribe_minutes::{truncate_chars, vtt_to_text, Document, Formatter, StructuredMinutes};

use crate::backoff::RetryPolicy;
use crate::credentials::{AuthError, CredentialCache};
use crate::external::CallError;
use crate::jobs::{Job, JobHandler, JobResult, JobStoreError};
use crate::metrics::MetricsAggregator;
use crate::poll::{self, PollError, PollPolicy};
use crate::ports::{
    CallContext, ChatDelivery, DeliveryLedger, MeetingDirectory, MinutesGenerator, TranscriptRef,
    TranscriptSource,
};
use crate::retry::{self, RetryError};

/// Stage of a processing attempt, as reported in errors and logs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Stage {
    Authenticate,
    FetchMeeting,
    WaitForTranscript,
    FetchTranscript,
    Generate,
    Format,
    Deliver,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Authenticate => "authenticate",
            Stage::FetchMeeting => "fetch_meeting",
            Stage::WaitForTranscript => "wait_for_transcript",
            Stage::FetchTranscript => "fetch_transcript",
            Stage::Generate => "generate",
            Stage::Format => "format",
            Stage::Deliver => "deliver",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Call(#[from] RetryError<CallError>),

    #[error("transcript not available after {attempts} checks")]
    TranscriptNotReady { attempts: u32 },

    #[error("delivery ledger unavailable: {0}")]
    Ledger(#[from] JobStoreError),
}

impl StageError {
    fn is_unauthorized(&self) -> bool {
        matches!(self, StageError::Call(e) if e.inner().status() == Some(401))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {cause}")]
pub struct ProcessError {
    pub stage: Stage,
    #[source]
    pub cause: StageError,
}

/// Tuning for one attempt.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub call_retry: RetryPolicy,
    pub transcript_poll: PollPolicy,
    /// Transcript text beyond this many characters is cut before generation.
    pub max_input_chars: usize,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            call_retry: RetryPolicy::default(),
            transcript_poll: PollPolicy::default(),
            max_input_chars: 100_000,
        }
    }
}

/// Everything the processor talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub credentials: Arc<CredentialCache>,
    pub meetings: Arc<dyn MeetingDirectory>,
    pub transcripts: Arc<dyn TranscriptSource>,
    pub generator: Arc<dyn MinutesGenerator>,
    pub formatter: Arc<dyn Formatter>,
    pub delivery: Arc<dyn ChatDelivery>,
    pub ledger: Arc<dyn DeliveryLedger>,
    pub metrics: Arc<MetricsAggregator>,
}

enum Step {
    FetchMeeting,
    WaitForTranscript { context: MeetingContext },
    FetchTranscript { context: MeetingContext, transcript: TranscriptRef },
    Generate { context: MeetingContext, text: String },
    Format { context: MeetingContext, minutes: StructuredMinutes },
    Deliver { document: Document },
    Done,
}

pub struct MeetingProcessor {
    deps: Collaborators,
    settings: ProcessorSettings,
}

impl MeetingProcessor {
    pub fn new(deps: Collaborators, settings: ProcessorSettings) -> Self {
        Self { deps, settings }
    }

    /// Run one attempt for `job`.
    pub async fn process(&self, job: &Job) -> Result<(), ProcessError> {
        if let Some(at) = job.delivered_at {
            info!(delivered_at = %at, "minutes already delivered; nothing to do");
            return Ok(());
        }

        let correlation_id = job.correlation_id;
        let credential = self
            .deps
            .credentials
            .get(correlation_id)
            .await
            .map_err(|e| self.fail(Stage::Authenticate, e.into()))?;
        let ctx = &CallContext::new(credential.token(), correlation_id);
        let payload = &job.payload;

        let mut step = Step::FetchMeeting;
        loop {
            step = match step {
                Step::FetchMeeting => {
                    let meetings = self.deps.meetings.as_ref();
                    let context = self
                        .call(Stage::FetchMeeting, correlation_id, move || {
                            meetings.meeting_context(ctx, &payload.user_id, &payload.meeting_id)
                        })
                        .await?;
                    debug!(subject = %context.subject, "meeting context loaded");
                    Step::WaitForTranscript { context }
                }

                Step::WaitForTranscript { context } => {
                    let transcript = self.wait_for_transcript(ctx, job).await?;
                    debug!(transcript_id = %transcript.id, "transcript available");
                    Step::FetchTranscript { context, transcript }
                }

                Step::FetchTranscript { context, transcript } => {
                    let transcripts = self.deps.transcripts.as_ref();
                    let transcript_id = transcript.id.as_str();
                    let raw = self
                        .call(Stage::FetchTranscript, correlation_id, move || {
                            transcripts.transcript_content(
                                ctx,
                                &payload.user_id,
                                &payload.meeting_id,
                                transcript_id,
                            )
                        })
                        .await?;
                    Step::Generate {
                        context,
                        text: vtt_to_text(&raw),
                    }
                }

                Step::Generate { context, text } => {
                    let (input, truncated) = truncate_chars(&text, self.settings.max_input_chars);
                    if truncated {
                        warn!(
                            original_chars = text.chars().count(),
                            max_chars = self.settings.max_input_chars,
                            "transcript truncated before generation"
                        );
                    }
                    let generator = self.deps.generator.as_ref();
                    let context_ref = &context;
                    let minutes = self
                        .call(Stage::Generate, correlation_id, move || {
                            generator.generate(correlation_id, input, context_ref)
                        })
                        .await?;
                    Step::Format { context, minutes }
                }

                Step::Format { context, minutes } => Step::Deliver {
                    document: self.deps.formatter.format(&minutes, &context),
                },

                Step::Deliver { document } => {
                    // Another attempt may have posted while this one was running.
                    if self
                        .deps
                        .ledger
                        .is_delivered(job.id)
                        .await
                        .map_err(|e| self.fail(Stage::Deliver, e.into()))?
                    {
                        info!("minutes were delivered by another attempt; not posting again");
                        return Ok(());
                    }

                    let delivery = self.deps.delivery.as_ref();
                    let document = &document;
                    self.call(Stage::Deliver, correlation_id, move || {
                        delivery.post_message(ctx, &payload.chat_id, document)
                    })
                    .await?;

                    if let Err(e) = self.deps.ledger.record_delivery(job.id).await {
                        // Posted but not recorded: a re-delivery of this job would post again.
                        error!(error = %e, "failed to record delivery");
                    }
                    Step::Done
                }

                Step::Done => return Ok(()),
            };
        }
    }

    async fn wait_for_transcript(
        &self,
        ctx: &CallContext,
        job: &Job,
    ) -> Result<TranscriptRef, ProcessError> {
        let transcripts = self.deps.transcripts.as_ref();
        let call_retry = &self.settings.call_retry;
        let payload = &job.payload;
        let correlation_id = ctx.correlation_id;

        let available = poll::wait_until_ready(
            &self.settings.transcript_poll,
            "transcript",
            correlation_id,
            move || {
                retry::run(call_retry, "list_transcripts", correlation_id, move || {
                    transcripts.list_transcripts(ctx, &payload.user_id, &payload.meeting_id)
                })
            },
        )
        .await
        .map_err(|e| {
            let cause = match e {
                PollError::NotReady { attempts } => StageError::TranscriptNotReady { attempts },
                PollError::Check(e) => StageError::Call(e),
            };
            self.fail(Stage::WaitForTranscript, cause)
        })?;

        // Latest transcript wins when a meeting was recorded more than once.
        available
            .into_iter()
            .max_by_key(|t| t.created_at)
            .ok_or_else(|| {
                self.fail(
                    Stage::WaitForTranscript,
                    StageError::TranscriptNotReady { attempts: 0 },
                )
            })
    }

    async fn call<T, F, Fut>(
        &self,
        stage: Stage,
        correlation_id: CorrelationId,
        op: F,
    ) -> Result<T, ProcessError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        retry::run(&self.settings.call_retry, stage.as_str(), correlation_id, op)
            .await
            .map_err(|e| self.fail(stage, e.into()))
    }

    fn fail(&self, stage: Stage, cause: StageError) -> ProcessError {
        if cause.is_unauthorized() {
            self.deps.credentials.invalidate();
        }
        ProcessError { stage, cause }
    }
}

#[async_trait]
impl JobHandler for MeetingProcessor {
    async fn handle(&self, job: &Job) -> JobResult {
        let started = Instant::now();
        let result = self.process(job).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                info!(elapsed_ms, "minutes delivered");
                JobResult::Success
            }
            Err(e) => {
                warn!(stage = %e.stage, error = %e, elapsed_ms, "processing attempt failed");
                JobResult::Failure(e.to_string())
            }
        }
    }

    async fn attempt_recorded(&self, job: &Job) {
        // Delivered before this attempt was claimed: nothing ran.
        if job.delivered_at.is_some() {
            return;
        }
        if let Some(attempt) = job.history.last() {
            self.deps.metrics.record_job_outcome(
                job.id,
                job.correlation_id,
                attempt.success,
                attempt.duration_ms,
            );
        }
    }

    async fn dead_lettered(&self, job: &Job) {
        self.deps.metrics.record_dead_letter();
        error!(
            job_id = %job.id,
            correlation_id = %job.correlation_id,
            meeting_id = %job.payload.meeting_id,
            attempts = job.attempts_made,
            last_error = job.last_error.as_deref().unwrap_or(""),
            "minutes job dead-lettered"
        );
    }
}
