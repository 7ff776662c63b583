//! Core job types.

use core::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scribe_core::{CorrelationId, JobId, MeetingRef};

use crate::backoff::RetryPolicy;

/// Job execution status.
///
/// A job waiting for re-delivery after a failed attempt is `Queued` with a
/// `scheduled_at` in the future and `last_error` set.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::InProgress,
        JobStatus::Succeeded,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::InProgress => "in_progress",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status '{s}'"))
    }
}

/// A unit of work: produce and deliver minutes for one meeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub correlation_id: CorrelationId,
    pub payload: MeetingRef,
    pub status: JobStatus,
    /// Number of times the job has been handed to a worker.
    pub attempts_made: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest time the job may be claimed.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Lease expiry while `InProgress`. An expired lease makes the job claimable again.
    pub locked_until: Option<DateTime<Utc>>,
    /// Set once the minutes were posted; later attempts skip delivery.
    pub delivered_at: Option<DateTime<Utc>>,
    pub history: Vec<JobAttemptRecord>,
}

/// Record of a job execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    RetryScheduled { at: DateTime<Utc> },
    DeadLettered,
}

impl Job {
    pub fn new(payload: MeetingRef, correlation_id: CorrelationId) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            correlation_id,
            payload,
            status: JobStatus::Queued,
            attempts_made: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            locked_until: None,
            delivered_at: None,
            history: Vec::new(),
        }
    }

    /// Job keyed by [`JobId::for_meeting`], so re-sent notifications for the
    /// same meeting collide on enqueue.
    pub fn for_meeting(payload: MeetingRef, correlation_id: CorrelationId) -> Self {
        let id = JobId::for_meeting(&payload);
        Self {
            id,
            ..Self::new(payload, correlation_id)
        }
    }

    /// Schedule the job with a delay from now.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.scheduled_at = Some(Utc::now() + to_chrono(delay));
        self
    }

    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Queued => self.scheduled_at.is_none_or(|at| at <= now),
            JobStatus::InProgress => self.locked_until.is_some_and(|until| until <= now),
            JobStatus::Succeeded | JobStatus::Failed => false,
        }
    }

    /// Hand the job to a worker for one attempt.
    pub fn mark_claimed(&mut self, lease: Duration, now: DateTime<Utc>) {
        self.status = JobStatus::InProgress;
        self.attempts_made += 1;
        self.locked_until = Some(now + to_chrono(lease));
        self.updated_at = now;
    }

    pub fn mark_succeeded(&mut self, started_at: DateTime<Utc>) {
        let now = Utc::now();
        self.status = JobStatus::Succeeded;
        self.locked_until = None;
        self.scheduled_at = None;
        self.updated_at = now;
        self.push_attempt(started_at, now, None);
    }

    /// Record a failed attempt and either schedule re-delivery or dead-letter.
    pub fn mark_failed(
        &mut self,
        error: String,
        started_at: DateTime<Utc>,
        policy: &RetryPolicy,
    ) -> FailureDisposition {
        let now = Utc::now();
        self.locked_until = None;
        self.updated_at = now;
        self.push_attempt(started_at, now, Some(error.clone()));
        self.last_error = Some(error);

        if policy.should_retry(self.attempts_made) {
            let at = now + to_chrono(policy.delay_for_attempt(self.attempts_made));
            self.status = JobStatus::Queued;
            self.scheduled_at = Some(at);
            FailureDisposition::RetryScheduled { at }
        } else {
            self.status = JobStatus::Failed;
            self.scheduled_at = None;
            FailureDisposition::DeadLettered
        }
    }

    /// Put a dead-lettered job back on the queue with a fresh attempt budget.
    pub fn requeue(&mut self) {
        self.status = JobStatus::Queued;
        self.attempts_made = 0;
        self.scheduled_at = None;
        self.locked_until = None;
        self.updated_at = Utc::now();
    }

    fn push_attempt(&mut self, started_at: DateTime<Utc>, now: DateTime<Utc>, error: Option<String>) {
        self.history.push(JobAttemptRecord {
            attempt: self.attempts_made,
            started_at,
            finished_at: now,
            success: error.is_none(),
            error,
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
        });
    }
}

pub(crate) fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// Result of handling a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Success,
    Failure(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(
            MeetingRef::new("m-1", "c-1", "u-1").unwrap(),
            CorrelationId::new(),
        )
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::exponential(3, Duration::from_secs(60))
    }

    #[test]
    fn status_parses_from_wire_names() {
        assert_eq!("in_progress".parse::<JobStatus>(), Ok(JobStatus::InProgress));
        assert_eq!(JobStatus::Failed.to_string(), "failed");
        assert!("running".parse::<JobStatus>().is_err());
    }

    #[test]
    fn job_lifecycle() {
        let mut job = job();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts_made, 0);
        assert!(job.is_claimable_at(Utc::now()));

        let now = Utc::now();
        job.mark_claimed(Duration::from_secs(30), now);
        assert_eq!(job.status, JobStatus::InProgress);
        assert_eq!(job.attempts_made, 1);
        assert!(!job.is_claimable_at(now));

        job.mark_succeeded(now);
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.history.len(), 1);
        assert!(job.history[0].success);
        assert!(!job.is_claimable_at(Utc::now()));
    }

    #[test]
    fn expired_lease_makes_job_claimable_again() {
        let mut job = job();
        let now = Utc::now();
        job.mark_claimed(Duration::from_secs(30), now);

        assert!(!job.is_claimable_at(now + chrono::Duration::seconds(29)));
        assert!(job.is_claimable_at(now + chrono::Duration::seconds(30)));
    }

    #[test]
    fn failure_schedules_retry_with_backoff_then_dead_letters() {
        let mut job = job();
        let policy = policy();

        job.mark_claimed(Duration::from_secs(30), Utc::now());
        let before = Utc::now();
        let first = job.mark_failed("boom 1".to_string(), before, &policy);
        match first {
            FailureDisposition::RetryScheduled { at } => {
                assert!(at >= before + chrono::Duration::seconds(60));
            }
            other => panic!("expected retry, got {other:?}"),
        }
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.last_error.as_deref(), Some("boom 1"));
        assert!(!job.is_claimable_at(Utc::now()));

        job.mark_claimed(Duration::from_secs(30), Utc::now());
        let before = Utc::now();
        match job.mark_failed("boom 2".to_string(), before, &policy) {
            FailureDisposition::RetryScheduled { at } => {
                assert!(at >= before + chrono::Duration::seconds(120));
            }
            other => panic!("expected retry, got {other:?}"),
        }

        job.mark_claimed(Duration::from_secs(30), Utc::now());
        let third = job.mark_failed("boom 3".to_string(), Utc::now(), &policy);
        assert_eq!(third, FailureDisposition::DeadLettered);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts_made, 3);
        assert_eq!(job.history.len(), 3);
        assert!(!job.is_claimable_at(Utc::now() + chrono::Duration::days(1)));
    }

    #[test]
    fn requeue_resets_attempt_budget_but_keeps_history() {
        let mut job = job();
        let policy = RetryPolicy::exponential(1, Duration::from_secs(1));
        job.mark_claimed(Duration::from_secs(30), Utc::now());
        job.mark_failed("boom".to_string(), Utc::now(), &policy);
        assert_eq!(job.status, JobStatus::Failed);

        job.requeue();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts_made, 0);
        assert_eq!(job.history.len(), 1);
        assert!(job.is_claimable_at(Utc::now()));
    }
}
