//! Configuration loading from the environment.
//!
//! Every setting has a default except the service credentials. Parsing is
//! strict: a present-but-malformed value is an error, not a silent default.

use core::fmt;
use core::str::FromStr;
use std::net::SocketAddr;
use std::time::Duration;

use scribe_minutes::MinutesFormat;

use crate::backoff::RetryPolicy;
use crate::poll::PollPolicy;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// A secret value that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_addr: SocketAddr,
    pub database: Option<DatabaseConfig>,
    pub queue: QueueConfig,
    pub call_retry: RetryPolicy,
    pub transcript_poll: PollPolicy,
    pub identity: IdentityConfig,
    pub graph_base_url: String,
    pub generation: GenerationConfig,
    pub http_timeout: Duration,
    pub minutes_format: MinutesFormat,
    pub webhook: WebhookValidation,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub workers: usize,
    pub poll_interval: Duration,
    pub lease: Duration,
    pub retry: RetryPolicy,
}

/// Client-credentials settings for the identity service.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub authority_url: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: Secret,
    /// OAuth scope requested for the resource API.
    pub scope: String,
    pub safety_margin: Duration,
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub api_key: Secret,
    pub base_url: String,
    pub model: String,
    pub max_input_chars: usize,
}

/// Inbound notification authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookValidation {
    /// Every notification must carry this `clientState`.
    Required { client_state: Secret },
    /// Accept notifications without checking `clientState`.
    Disabled,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let database = env.optional("DATABASE_URL").map(|url| -> Result<_, ConfigError> {
            Ok(DatabaseConfig {
                url: Secret::new(url),
                max_connections: env.parse_or("DATABASE_MAX_CONNECTIONS", 5)?,
            })
        });

        let queue = QueueConfig {
            workers: env.parse_or("WORKER_COUNT", 4usize)?.max(1),
            poll_interval: env.millis_or("QUEUE_POLL_INTERVAL_MS", 500)?,
            lease: Duration::from_secs(env.parse_or("JOB_LEASE_SECS", 1800)?),
            retry: RetryPolicy::exponential(
                env.parse_or("JOB_MAX_ATTEMPTS", 3)?,
                env.millis_or("JOB_BACKOFF_BASE_MS", 60_000)?,
            ),
        };

        let call_retry = RetryPolicy::exponential(
            env.parse_or("CALL_MAX_ATTEMPTS", 3)?,
            env.millis_or("CALL_BACKOFF_BASE_MS", 1_000)?,
        )
        .with_max_delay(env.millis_or("CALL_BACKOFF_MAX_MS", 30_000)?);

        let transcript_poll = PollPolicy {
            max_attempts: env.parse_or("TRANSCRIPT_POLL_MAX_ATTEMPTS", 10)?,
            unit_wait: env.millis_or("TRANSCRIPT_POLL_UNIT_MS", 30_000)?,
            max_wait: env.millis_or("TRANSCRIPT_POLL_MAX_WAIT_MS", 300_000)?,
        };

        let identity = IdentityConfig {
            authority_url: env.string_or("AZURE_AUTHORITY_URL", "https://login.microsoftonline.com"),
            tenant_id: env.required("AZURE_TENANT_ID")?,
            client_id: env.required("AZURE_CLIENT_ID")?,
            client_secret: Secret::new(env.required("AZURE_CLIENT_SECRET")?),
            scope: env.string_or("AZURE_SCOPE", "https://graph.microsoft.com/.default"),
            safety_margin: Duration::from_secs(env.parse_or("CREDENTIAL_SAFETY_MARGIN_SECS", 300)?),
        };

        let generation = GenerationConfig {
            api_key: Secret::new(env.required("OPENAI_API_KEY")?),
            base_url: env.string_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            model: env.string_or("OPENAI_MODEL", "gpt-4o-mini"),
            max_input_chars: env.parse_or("GENERATION_MAX_INPUT_CHARS", 100_000)?,
        };

        let webhook = match env.string_or("WEBHOOK_VALIDATION", "required").to_lowercase().as_str() {
            "required" => WebhookValidation::Required {
                client_state: Secret::new(env.optional("WEBHOOK_CLIENT_STATE").ok_or(
                    ConfigError::Invalid {
                        key: "WEBHOOK_CLIENT_STATE",
                        message: "must be set when WEBHOOK_VALIDATION=required".to_string(),
                    },
                )?),
            },
            "disabled" => WebhookValidation::Disabled,
            other => {
                return Err(ConfigError::Invalid {
                    key: "WEBHOOK_VALIDATION",
                    message: format!("expected required or disabled, got '{other}'"),
                });
            }
        };

        Ok(Self {
            server_addr: env.parse_or("SERVER_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            database: database.transpose()?,
            queue,
            call_retry,
            transcript_poll,
            identity,
            graph_base_url: env.string_or("GRAPH_BASE_URL", "https://graph.microsoft.com/v1.0"),
            generation,
            http_timeout: Duration::from_secs(env.parse_or("HTTP_TIMEOUT_SECS", 60)?),
            minutes_format: env.parse_or("MINUTES_FORMAT", MinutesFormat::default())?,
            webhook,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &'static str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    fn string_or(&self, key: &'static str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.optional(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                message: e.to_string(),
            }),
        }
    }

    fn millis_or(&self, key: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
        self.parse_or(key, default_ms).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("AZURE_TENANT_ID", "tenant"),
            ("AZURE_CLIENT_ID", "client"),
            ("AZURE_CLIENT_SECRET", "secret"),
            ("OPENAI_API_KEY", "sk-test"),
            ("WEBHOOK_CLIENT_STATE", "shared-secret"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_apply() {
        let config = load(&base()).unwrap();

        assert_eq!(config.server_addr.port(), 8080);
        assert!(config.database.is_none());
        assert_eq!(config.queue.workers, 4);
        assert_eq!(config.queue.retry.max_attempts, 3);
        assert_eq!(config.queue.retry.base_delay, Duration::from_secs(60));
        assert_eq!(config.call_retry.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.call_retry.max_delay, Duration::from_secs(30));
        assert_eq!(config.transcript_poll.max_attempts, 10);
        assert_eq!(config.identity.safety_margin, Duration::from_secs(300));
        assert_eq!(config.generation.max_input_chars, 100_000);
        assert_eq!(config.minutes_format, MinutesFormat::Html);
        assert_eq!(
            config.webhook,
            WebhookValidation::Required {
                client_state: Secret::new("shared-secret")
            }
        );
    }

    #[test]
    fn missing_credentials_are_reported() {
        let mut vars = base();
        vars.remove("AZURE_CLIENT_SECRET");
        assert_eq!(load(&vars).unwrap_err(), ConfigError::Missing("AZURE_CLIENT_SECRET"));
    }

    #[test]
    fn malformed_numbers_are_errors() {
        let mut vars = base();
        vars.insert("WORKER_COUNT", "lots");
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::Invalid { key: "WORKER_COUNT", .. }
        ));
    }

    #[test]
    fn required_validation_needs_a_client_state() {
        let mut vars = base();
        vars.remove("WEBHOOK_CLIENT_STATE");
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::Invalid { key: "WEBHOOK_CLIENT_STATE", .. }
        ));

        vars.insert("WEBHOOK_VALIDATION", "disabled");
        assert_eq!(load(&vars).unwrap().webhook, WebhookValidation::Disabled);
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let mut vars = base();
        vars.insert("DATABASE_URL", "postgres://user:pw@db/scribe");
        let rendered = format!("{:?}", load(&vars).unwrap());
        assert!(!rendered.contains("pw@db"));
        assert!(!rendered.contains("sk-test"));
    }
}
