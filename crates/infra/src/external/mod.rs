//! External service clients: identity, meetings/chat API, text generation.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;

use crate::retry::Retriable;

pub mod graph;
pub mod identity;
pub mod openai;

pub use graph::GraphClient;
pub use identity::AzureAdCredentialProvider;
pub use openai::OpenAiGenerator;

/// Header carrying the job's correlation id on every outbound request.
pub const CLIENT_REQUEST_ID: &str = "client-request-id";

/// Failure of one remote call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("{service} returned {status}: {message}")]
    Status {
        service: &'static str,
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("{service} request timed out")]
    Timeout { service: &'static str },

    #[error("{service} transport error: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },

    #[error("{service} returned an unusable response: {message}")]
    InvalidResponse {
        service: &'static str,
        message: String,
    },
}

impl CallError {
    pub fn status(&self) -> Option<u16> {
        match self {
            CallError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CallError::Timeout { service }
        } else if err.is_decode() {
            CallError::InvalidResponse {
                service,
                message: err.to_string(),
            }
        } else {
            CallError::Transport {
                service,
                message: err.to_string(),
            }
        }
    }

    pub(crate) fn invalid(service: &'static str, message: impl Into<String>) -> Self {
        CallError::InvalidResponse {
            service,
            message: message.into(),
        }
    }
}

/// 4xx other than 429 means the request itself is wrong; everything else may
/// succeed on a later try.
impl Retriable for CallError {
    fn is_retriable(&self) -> bool {
        match self {
            CallError::Status { status, .. } => !(400..500).contains(status) || *status == 429,
            CallError::Timeout { .. }
            | CallError::Transport { .. }
            | CallError::InvalidResponse { .. } => true,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CallError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Pass successful responses through, turn the rest into [`CallError::Status`].
pub(crate) async fn check_status(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, CallError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();

    Err(CallError::Status {
        service,
        status: status.as_u16(),
        message: error_message(&body),
        retry_after,
    })
}

/// Best-effort message from an error body: `{"error": {"message": ..}}`,
/// `{"error_description": ..}`, or the (shortened) raw text.
pub(crate) fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let candidates = [
            value.pointer("/error/message"),
            value.get("error_description"),
            value.get("error"),
            value.get("message"),
        ];
        if let Some(msg) = candidates.into_iter().flatten().find_map(|v| v.as_str()) {
            return msg.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "no response body".to_string();
    }
    trimmed.chars().take(300).collect()
}

/// Shared HTTP client with the configured request timeout.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("scribe/", env!("CARGO_PKG_VERSION")))
        .build()
}
