//! Job executor: a pool of tokio workers claiming jobs from a [`JobStore`].

use std::pin::pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};

use scribe_core::JobId;

use crate::backoff::RetryPolicy;

use super::store::{JobStore, JobStoreError};
use super::types::{FailureDisposition, Job, JobResult};

const MIN_LEASE_RENEWAL: Duration = Duration::from_millis(10);

/// Processes one attempt of a job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> JobResult;

    /// Called after the outcome of an attempt was stored. Not called when the
    /// attempt lost its lease and the outcome was discarded.
    async fn attempt_recorded(&self, _job: &Job) {}

    /// Called once when a job exhausts its attempts.
    async fn dead_lettered(&self, _job: &Job) {}
}

/// Job executor configuration.
#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// How long an idle worker waits before polling again
    pub poll_interval: Duration,
    /// Number of concurrent workers
    pub workers: usize,
    /// How long a claimed job stays invisible to other workers. Renewed every
    /// third of the lease while the attempt runs.
    pub lease: Duration,
    /// Re-delivery policy for failed attempts
    pub retry_policy: RetryPolicy,
    /// Name for logging
    pub name: String,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            workers: 4,
            lease: Duration::from_secs(30 * 60),
            retry_policy: RetryPolicy::exponential(3, Duration::from_secs(60)),
            name: "minutes-executor".to_string(),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExecutorStats {
    pub workers: usize,
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_retried: u64,
    pub jobs_dead_lettered: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// Cloneable read access to a running executor's statistics.
#[derive(Debug, Clone)]
pub struct ExecutorStatsHandle {
    inner: Arc<Mutex<ExecutorStats>>,
    started: Instant,
}

impl ExecutorStatsHandle {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ExecutorStats::default())),
            started: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> ExecutorStats {
        let mut stats = self.lock().clone();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }

    fn update(&self, f: impl FnOnce(&mut ExecutorStats)) {
        f(&mut self.lock());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ExecutorStats> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to control a running executor.
#[derive(Debug)]
pub struct JobExecutorHandle {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    stats: ExecutorStatsHandle,
}

impl JobExecutorHandle {
    /// Stop claiming new jobs and wait for in-flight attempts to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "job worker panicked");
            }
        }
    }

    /// Get current executor statistics.
    pub fn stats(&self) -> ExecutorStats {
        self.stats.snapshot()
    }

    pub fn stats_handle(&self) -> ExecutorStatsHandle {
        self.stats.clone()
    }
}

/// What happened to a claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    RetryScheduled { at: DateTime<Utc> },
    DeadLettered,
}

/// Background job executor.
///
/// Claims ready jobs, hands them to the handler and records the outcome:
/// success, re-delivery with backoff, or dead-lettering once the retry policy
/// is exhausted.
pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
    stats: ExecutorStatsHandle,
}

impl JobExecutor {
    pub fn new(store: Arc<dyn JobStore>, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            store,
            handler,
            stats: ExecutorStatsHandle::new(),
        }
    }

    /// Spawn `config.workers` worker tasks on the current runtime.
    pub fn spawn(self, config: JobExecutorConfig) -> JobExecutorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();
        stats.update(|s| s.workers = config.workers);

        let executor = Arc::new(self);
        let config = Arc::new(config);
        info!(executor = %config.name, workers = config.workers, "job executor started");

        let workers = (0..config.workers)
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    executor.clone(),
                    config.clone(),
                    shutdown_rx.clone(),
                ))
            })
            .collect();

        JobExecutorHandle {
            shutdown: shutdown_tx,
            workers,
            stats,
        }
    }

    /// Claim and run at most one job.
    pub async fn execute_next(
        &self,
        config: &JobExecutorConfig,
    ) -> Result<Option<(JobId, AttemptOutcome)>, JobStoreError> {
        let Some(mut job) = self.store.claim_next(config.lease).await? else {
            return Ok(None);
        };

        let span = info_span!(
            "job",
            job_id = %job.id,
            correlation_id = %job.correlation_id,
            meeting_id = %job.payload.meeting_id,
            attempt = job.attempts_made,
        );

        self.stats.update(|s| s.current_running += 1);
        let result = self.execute_job(&mut job, config).instrument(span).await;
        self.stats.update(|s| {
            s.current_running = s.current_running.saturating_sub(1);
            s.jobs_processed += 1;
            match &result {
                Ok(AttemptOutcome::Succeeded) => s.jobs_succeeded += 1,
                Ok(AttemptOutcome::RetryScheduled { .. }) => s.jobs_retried += 1,
                Ok(AttemptOutcome::DeadLettered) => s.jobs_dead_lettered += 1,
                Err(_) => {}
            }
        });

        result.map(|outcome| Some((job.id, outcome)))
    }

    async fn execute_job(
        &self,
        job: &mut Job,
        config: &JobExecutorConfig,
    ) -> Result<AttemptOutcome, JobStoreError> {
        debug!(executor = %config.name, "claimed job");
        let started = Utc::now();

        let outcome = match self.run_leased(job, config).await {
            JobResult::Success => {
                job.mark_succeeded(started);
                info!("job succeeded");
                AttemptOutcome::Succeeded
            }
            JobResult::Failure(error) => {
                match job.mark_failed(error.clone(), started, &config.retry_policy) {
                    FailureDisposition::RetryScheduled { at } => {
                        warn!(error = %error, retry_at = %at, "job attempt failed; re-delivery scheduled");
                        AttemptOutcome::RetryScheduled { at }
                    }
                    FailureDisposition::DeadLettered => {
                        error!(
                            error = %error,
                            attempts = job.attempts_made,
                            "job failed permanently; dead-lettered"
                        );
                        AttemptOutcome::DeadLettered
                    }
                }
            }
        };

        self.store.finish_attempt(job).await?;
        self.handler.attempt_recorded(job).await;
        if outcome == AttemptOutcome::DeadLettered {
            self.handler.dead_lettered(job).await;
        }
        Ok(outcome)
    }

    /// Run the handler, renewing the job's lease until it returns.
    async fn run_leased(&self, job: &Job, config: &JobExecutorConfig) -> JobResult {
        let period = (config.lease / 3).max(MIN_LEASE_RENEWAL);
        let mut renewal = time::interval_at(time::Instant::now() + period, period);
        renewal.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut handled = pin!(self.handler.handle(job));
        loop {
            tokio::select! {
                result = &mut handled => return result,
                _ = renewal.tick() => {
                    match self.store.extend_lease(job.id, job.attempts_made, config.lease).await {
                        Ok(()) => debug!(lease_ms = config.lease.as_millis() as u64, "lease renewed"),
                        Err(e) => warn!(error = %e, "failed to renew lease"),
                    }
                }
            }
        }
    }
}

async fn worker_loop(
    worker: usize,
    executor: Arc<JobExecutor>,
    config: Arc<JobExecutorConfig>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(executor = %config.name, worker, "job worker started");

    while !*shutdown.borrow() {
        match executor.execute_next(&config).await {
            Ok(Some(_)) => continue,
            Ok(None) => {}
            Err(JobStoreError::LeaseLost(job_id)) => {
                warn!(executor = %config.name, %job_id, "lease expired before attempt finished; outcome discarded");
                continue;
            }
            Err(e) => {
                error!(executor = %config.name, worker, error = %e, "job store unavailable");
            }
        }

        let stop = tokio::select! {
            _ = tokio::time::sleep(config.poll_interval) => false,
            changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        };
        if stop {
            break;
        }
    }

    debug!(executor = %config.name, worker, "job worker stopped");
}
