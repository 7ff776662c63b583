//! Call-level retry with backoff.
//!
//! Wraps a single fallible remote call. Errors decide their own fate through
//! [`Retriable`]: non-retriable errors surface immediately, retriable errors are
//! retried until the policy runs out.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use scribe_core::CorrelationId;
use tracing::{debug, warn};

use crate::backoff::RetryPolicy;

/// Classification of a failed call.
pub trait Retriable {
    fn is_retriable(&self) -> bool;

    /// Minimum wait requested by the remote side (e.g. a `Retry-After` header).
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Outcome of a call that never succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Surfaced on the first non-retriable failure.
    NonRetriable(E),
    /// Every allowed attempt failed with a retriable error.
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    /// The underlying failure.
    pub fn inner(&self) -> &E {
        match self {
            RetryError::NonRetriable(e) => e,
            RetryError::Exhausted { last, .. } => last,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::NonRetriable(e) => e,
            RetryError::Exhausted { last, .. } => last,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::NonRetriable(e) => write!(f, "{e}"),
            RetryError::Exhausted { attempts, last } => {
                write!(f, "retries exhausted after {attempts} attempts: {last}")
            }
        }
    }
}

impl<E> std::error::Error for RetryError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner())
    }
}

/// Run `op` until it succeeds, fails non-retriably, or the policy is exhausted.
///
/// Waits `policy.delay_for_attempt(n)` after the n-th failure, or longer if the
/// error carries a retry-after hint.
pub async fn run<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    correlation_id: CorrelationId,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retriable + fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let err = match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(%correlation_id, operation, attempt, "call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_retriable() {
            warn!(
                %correlation_id,
                operation,
                attempt,
                error = %err,
                "call failed with non-retriable error"
            );
            return Err(RetryError::NonRetriable(err));
        }

        if attempt >= max_attempts {
            warn!(
                %correlation_id,
                operation,
                attempts = attempt,
                error = %err,
                "call retries exhausted"
            );
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }

        let mut delay = policy.delay_for_attempt(attempt);
        if let Some(hint) = err.retry_after() {
            delay = delay.max(hint);
        }

        warn!(
            %correlation_id,
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "call failed; retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
