//! Cached service credential with single-flight refresh.
//!
//! One credential is shared by every concurrent job. It is refreshed only when
//! missing or inside its safety window, and concurrent callers that find it
//! stale wait on the same refresh instead of each issuing one.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use scribe_core::CorrelationId;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A token as issued by the identity service.
#[derive(Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in: Duration,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("identity service request failed: {0}")]
    Request(String),

    #[error("identity service rejected the credentials ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("identity service returned an unusable response: {0}")]
    Malformed(String),
}

/// Source of fresh credentials (e.g. a client-credentials grant).
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn issue(&self, correlation_id: CorrelationId) -> Result<IssuedToken, AuthError>;
}

/// A cached credential. `expires_at` already has the safety margin applied.
#[derive(Clone)]
pub struct Credential {
    token: String,
    expires_at: Instant,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: Instant) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn is_valid_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

type Refresh = Arc<OnceCell<Result<Credential, AuthError>>>;

#[derive(Default)]
struct CacheState {
    current: Option<Credential>,
    inflight: Option<Refresh>,
}

pub struct CredentialCache {
    provider: Arc<dyn CredentialProvider>,
    safety_margin: Duration,
    state: Mutex<CacheState>,
}

impl CredentialCache {
    pub fn new(provider: Arc<dyn CredentialProvider>, safety_margin: Duration) -> Self {
        Self {
            provider,
            safety_margin,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Current credential, refreshing it first if missing or expired.
    pub async fn get(&self, correlation_id: CorrelationId) -> Result<Credential, AuthError> {
        let refresh = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(current) = &state.current {
                if current.is_valid_at(Instant::now()) {
                    return Ok(current.clone());
                }
            }
            state
                .inflight
                .get_or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = refresh
            .get_or_init(|| self.refresh(correlation_id))
            .await
            .clone();

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state
            .inflight
            .as_ref()
            .is_some_and(|inflight| Arc::ptr_eq(inflight, &refresh))
        {
            state.inflight = None;
            if let Ok(credential) = &result {
                state.current = Some(credential.clone());
            }
        }

        result
    }

    /// Drop the cached credential so the next `get` refreshes.
    pub fn invalidate(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.current.take().is_some() {
            info!("cached credential invalidated");
        }
    }

    async fn refresh(&self, correlation_id: CorrelationId) -> Result<Credential, AuthError> {
        debug!(%correlation_id, "refreshing service credential");
        let issued_at = Instant::now();

        match self.provider.issue(correlation_id).await {
            Ok(issued) => {
                let lifetime = issued.expires_in.saturating_sub(self.safety_margin);
                if lifetime.is_zero() {
                    warn!(
                        %correlation_id,
                        expires_in_secs = issued.expires_in.as_secs(),
                        "issued credential lifetime is within the safety margin"
                    );
                }
                info!(
                    %correlation_id,
                    valid_for_secs = lifetime.as_secs(),
                    "service credential refreshed"
                );
                Ok(Credential::new(issued.access_token, issued_at + lifetime))
            }
            Err(err) => {
                warn!(%correlation_id, error = %err, "credential refresh failed");
                Err(err)
            }
        }
    }
}
