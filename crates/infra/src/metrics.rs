//! Process-wide job outcome counters.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use scribe_core::{CorrelationId, JobId};
use serde::Serialize;

const RECENT_CAPACITY: usize = 50;

/// One finished processing attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeRecord {
    pub job_id: JobId,
    pub correlation_id: CorrelationId,
    pub success: bool,
    pub elapsed_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_processed: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub total_dead_lettered: u64,
    /// Mean over successful attempts only.
    pub average_processing_time_ms: f64,
    /// Most recent attempts, newest first.
    pub recent: Vec<OutcomeRecord>,
}

#[derive(Default)]
struct Counters {
    total_processed: u64,
    total_succeeded: u64,
    total_failed: u64,
    total_dead_lettered: u64,
    success_time_ms: u64,
    recent: VecDeque<OutcomeRecord>,
}

#[derive(Default)]
pub struct MetricsAggregator {
    inner: Mutex<Counters>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_outcome(&self, success: bool, elapsed_ms: u64) {
        let mut c = self.lock();
        Self::count(&mut c, success, elapsed_ms);
    }

    /// Like [`record_outcome`](Self::record_outcome), also keeping the attempt
    /// in the recent-outcomes window.
    pub fn record_job_outcome(
        &self,
        job_id: JobId,
        correlation_id: CorrelationId,
        success: bool,
        elapsed_ms: u64,
    ) {
        let mut c = self.lock();
        Self::count(&mut c, success, elapsed_ms);
        if c.recent.len() == RECENT_CAPACITY {
            c.recent.pop_back();
        }
        c.recent.push_front(OutcomeRecord {
            job_id,
            correlation_id,
            success,
            elapsed_ms,
            recorded_at: Utc::now(),
        });
    }

    pub fn record_dead_letter(&self) {
        self.lock().total_dead_lettered += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = self.lock();
        let average_processing_time_ms = if c.total_succeeded == 0 {
            0.0
        } else {
            c.success_time_ms as f64 / c.total_succeeded as f64
        };

        MetricsSnapshot {
            total_processed: c.total_processed,
            total_succeeded: c.total_succeeded,
            total_failed: c.total_failed,
            total_dead_lettered: c.total_dead_lettered,
            average_processing_time_ms,
            recent: c.recent.iter().cloned().collect(),
        }
    }

    fn count(c: &mut Counters, success: bool, elapsed_ms: u64) {
        c.total_processed += 1;
        if success {
            c.total_succeeded += 1;
            c.success_time_ms = c.success_time_ms.saturating_add(elapsed_ms);
        } else {
            c.total_failed += 1;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
