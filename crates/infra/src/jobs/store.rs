//! Job storage: the queue contract and its in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use scribe_core::JobId;

use super::types::{to_chrono, Job, JobStatus};

/// Durable job queue.
///
/// Delivery is at-least-once: a claimed job is leased, and a job whose lease
/// runs out before its attempt is recorded becomes claimable again.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Enqueue a new job.
    async fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError>;

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Claim the oldest claimable job, leasing it for `lease`.
    /// Returns None if no jobs are available.
    async fn claim_next(&self, lease: Duration) -> Result<Option<Job>, JobStoreError>;

    /// Persist the outcome of an attempt on a claimed job.
    ///
    /// Fails with [`JobStoreError::LeaseLost`] if the job was reclaimed by
    /// another worker in the meantime.
    async fn finish_attempt(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Push the lease of a running attempt `lease` into the future.
    ///
    /// Fails with [`JobStoreError::LeaseLost`] if attempt `attempts_made` no
    /// longer holds the job.
    async fn extend_lease(
        &self,
        job_id: JobId,
        attempts_made: u32,
        lease: Duration,
    ) -> Result<(), JobStoreError>;

    /// Record that the job's minutes were posted.
    async fn mark_delivered(&self, job_id: JobId) -> Result<(), JobStoreError>;

    /// List jobs, newest first, optionally filtered by status.
    async fn list_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError>;

    /// Move a failed job back to the queue with a fresh attempt budget.
    async fn requeue_failed(&self, job_id: JobId) -> Result<Job, JobStoreError>;

    async fn stats(&self) -> Result<JobStats, JobStoreError>;

    /// Cheap reachability check for health reporting.
    async fn ping(&self) -> Result<(), JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job {0} is no longer leased by this worker")]
    LeaseLost(JobId),
    #[error("job {id} is {status}, expected {expected}")]
    InvalidState {
        id: JobId,
        status: JobStatus,
        expected: JobStatus,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub queued: u64,
    pub in_progress: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl JobStats {
    pub(crate) fn count(&mut self, status: JobStatus, n: u64) {
        match status {
            JobStatus::Queued => self.queued += n,
            JobStatus::InProgress => self.in_progress += n,
            JobStatus::Succeeded => self.succeeded += n,
            JobStatus::Failed => self.failed += n,
        }
    }
}

/// In-memory job store for tests/dev. Jobs do not survive a restart.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<JobId, Job>>, JobStoreError> {
        self.jobs
            .read()
            .map_err(|_| JobStoreError::Storage("job map lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<JobId, Job>>, JobStoreError> {
        self.jobs
            .write()
            .map_err(|_| JobStoreError::Storage("job map lock poisoned".to_string()))
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self.write()?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.read()?.get(&job_id).cloned())
    }

    async fn claim_next(&self, lease: Duration) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.write()?;
        let now = Utc::now();

        // Oldest due job first
        let next = jobs
            .values()
            .filter(|j| j.is_claimable_at(now))
            .min_by_key(|j| (j.scheduled_at.unwrap_or(j.created_at), j.id))
            .map(|j| j.id);

        Ok(next.and_then(|id| jobs.get_mut(&id)).map(|job| {
            job.mark_claimed(lease, now);
            job.clone()
        }))
    }

    async fn finish_attempt(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self.write()?;
        let stored = jobs.get_mut(&job.id).ok_or(JobStoreError::NotFound(job.id))?;
        if stored.status != JobStatus::InProgress || stored.attempts_made != job.attempts_made {
            return Err(JobStoreError::LeaseLost(job.id));
        }
        // The delivery marker may have been written during the attempt.
        let delivered_at = stored.delivered_at.or(job.delivered_at);
        *stored = job.clone();
        stored.delivered_at = delivered_at;
        Ok(())
    }

    async fn extend_lease(
        &self,
        job_id: JobId,
        attempts_made: u32,
        lease: Duration,
    ) -> Result<(), JobStoreError> {
        let mut jobs = self.write()?;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        if job.status != JobStatus::InProgress || job.attempts_made != attempts_made {
            return Err(JobStoreError::LeaseLost(job_id));
        }
        let now = Utc::now();
        job.locked_until = Some(now + to_chrono(lease));
        job.updated_at = now;
        Ok(())
    }

    async fn mark_delivered(&self, job_id: JobId) -> Result<(), JobStoreError> {
        let mut jobs = self.write()?;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        let now = Utc::now();
        job.delivered_at.get_or_insert(now);
        job.updated_at = now;
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.read()?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();

        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        result.truncate(limit);
        Ok(result)
    }

    async fn requeue_failed(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        let mut jobs = self.write()?;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        if job.status != JobStatus::Failed {
            return Err(JobStoreError::InvalidState {
                id: job_id,
                status: job.status,
                expected: JobStatus::Failed,
            });
        }
        job.requeue();
        Ok(job.clone())
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.read()?;
        let mut stats = JobStats::default();
        for job in jobs.values() {
            stats.count(job.status, 1);
        }
        Ok(stats)
    }

    async fn ping(&self) -> Result<(), JobStoreError> {
        self.read().map(|_| ())
    }
}
