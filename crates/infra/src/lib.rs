//! Infrastructure layer: job queue, outbound service clients, configuration,
//! and the meeting processor that ties them together.

pub mod backoff;
pub mod config;
pub mod credentials;
pub mod external;
pub mod jobs;
pub mod metrics;
pub mod poll;
pub mod ports;
pub mod processor;
pub mod retry;

pub use backoff::{BackoffKind, RetryPolicy};
pub use config::{Config, ConfigError};
pub use credentials::{AuthError, Credential, CredentialCache, CredentialProvider};
pub use metrics::{MetricsAggregator, MetricsSnapshot};
pub use poll::PollPolicy;
pub use processor::{Collaborators, MeetingProcessor, ProcessError, ProcessorSettings, Stage};
