//! Readiness polling for resources that appear some time after an event.
//!
//! Transcripts are published minutes after a meeting ends, so the pipeline
//! checks once right away and then waits a growing interval between checks.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use scribe_core::CorrelationId;
use tracing::{debug, info};

/// Wait schedule: the wait before re-check `n` is `min(unit_wait * n, max_wait)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Number of re-checks after the initial check.
    pub max_attempts: u32,
    pub unit_wait: Duration,
    pub max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            unit_wait: Duration::from_secs(30),
            max_wait: Duration::from_secs(300),
        }
    }
}

impl PollPolicy {
    pub fn wait_before(&self, attempt: u32) -> Duration {
        self.unit_wait.saturating_mul(attempt).min(self.max_wait)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollError<E> {
    /// The resource never became available.
    NotReady { attempts: u32 },
    /// A check failed outright.
    Check(E),
}

impl<E: fmt::Display> fmt::Display for PollError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollError::NotReady { attempts } => {
                write!(f, "resource not ready after {attempts} checks")
            }
            PollError::Check(e) => write!(f, "readiness check failed: {e}"),
        }
    }
}

impl<E> std::error::Error for PollError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PollError::NotReady { .. } => None,
            PollError::Check(e) => Some(e),
        }
    }
}

/// Check until `check` yields a non-empty list.
///
/// Returns as soon as a check succeeds with items. A check error ends polling
/// immediately. After the initial check plus `max_attempts` re-checks all come
/// back empty, fails with [`PollError::NotReady`].
pub async fn wait_until_ready<T, E, F, Fut>(
    policy: &PollPolicy,
    resource: &str,
    correlation_id: CorrelationId,
    mut check: F,
) -> Result<Vec<T>, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<T>, E>>,
{
    let items = check().await.map_err(PollError::Check)?;
    if !items.is_empty() {
        return Ok(items);
    }

    for attempt in 1..=policy.max_attempts {
        let wait = policy.wait_before(attempt);
        info!(
            %correlation_id,
            resource,
            attempt,
            wait_secs = wait.as_secs(),
            "resource not ready; waiting"
        );
        tokio::time::sleep(wait).await;

        let items = check().await.map_err(PollError::Check)?;
        if !items.is_empty() {
            debug!(%correlation_id, resource, attempt, "resource ready");
            return Ok(items);
        }
    }

    Err(PollError::NotReady {
        attempts: policy.max_attempts + 1,
    })
}
