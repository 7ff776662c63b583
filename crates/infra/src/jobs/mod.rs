//! Durable job queue with lease-based claiming, backoff and dead-lettering.
//!
//! ## Components
//!
//! - `Job`: one meeting to summarize, with attempt bookkeeping
//! - `JobStore`: persistence for jobs (in-memory or Postgres)
//! - `JobExecutor`: worker pool that runs jobs through a `JobHandler`
//!
//! A job whose attempts are exhausted stays in the store with status `failed`;
//! those rows are the dead-letter queue and can be re-queued by id.

pub mod executor;
pub mod postgres;
pub mod store;
pub mod types;

pub use executor::{
    AttemptOutcome, ExecutorStats, ExecutorStatsHandle, JobExecutor, JobExecutorConfig,
    JobExecutorHandle, JobHandler,
};
pub use postgres::PostgresJobStore;
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{FailureDisposition, Job, JobAttemptRecord, JobResult, JobStatus};
