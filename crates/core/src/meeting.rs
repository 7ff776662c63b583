//! Meeting payloads shared by ingestion, the queue and the processor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// The immutable payload of a job: which meeting ended, where the minutes go,
/// and whose delegated view of the meeting the pipeline reads through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeetingRef {
    pub meeting_id: String,
    pub chat_id: String,
    /// Organizer of the meeting; transcripts are listed under this user.
    pub user_id: String,
}

impl MeetingRef {
    /// Build a payload, rejecting blank fields.
    pub fn new(
        meeting_id: impl Into<String>,
        chat_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> DomainResult<Self> {
        let meeting_ref = Self {
            meeting_id: meeting_id.into().trim().to_string(),
            chat_id: chat_id.into().trim().to_string(),
            user_id: user_id.into().trim().to_string(),
        };

        for (field, value) in [
            ("meeting_id", &meeting_ref.meeting_id),
            ("chat_id", &meeting_ref.chat_id),
            ("user_id", &meeting_ref.user_id),
        ] {
            if value.is_empty() {
                return Err(DomainError::validation(format!("{field} must not be empty")));
            }
        }

        Ok(meeting_ref)
    }
}

/// Descriptive context about a meeting, passed to the generator and formatter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingContext {
    pub subject: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub organizer: Option<String>,
    pub participants: Vec<String>,
}

impl MeetingContext {
    /// Meeting length in whole minutes, when both ends are known.
    pub fn duration_minutes(&self) -> Option<i64> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if end >= start => Some((end - start).num_minutes()),
            _ => None,
        }
    }
}
