//! Strongly-typed identifiers used across the pipeline.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::meeting::MeetingRef;

/// Identifier of a queued job, assigned by the queue at enqueue time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

/// Identifier threaded through every log line, metric and outbound call made
/// on behalf of one job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal, $ctor:expr) => {
        impl $t {
            pub fn new() -> Self {
                Self($ctor)
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

// Job ids are UUIDv7 (time-ordered); correlation ids are UUIDv4.
impl_uuid_newtype!(JobId, "JobId", Uuid::now_v7());
impl_uuid_newtype!(CorrelationId, "CorrelationId", Uuid::new_v4());

const MEETING_JOB_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a57_93d4_4c1e_b0a8_5e27_d9c3_41f6);

impl JobId {
    /// Stable (UUIDv5) id of the job for one meeting posting into one chat.
    ///
    /// A notification delivered twice maps onto the same job.
    pub fn for_meeting(meeting: &MeetingRef) -> Self {
        let key = format!("{}\n{}", meeting.meeting_id, meeting.chat_id);
        Self(Uuid::new_v5(&MEETING_JOB_NAMESPACE, key.as_bytes()))
    }
}
