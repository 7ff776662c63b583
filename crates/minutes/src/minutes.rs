use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured meeting minutes as returned by the generation service.
///
/// This is the contract between the generator and the formatter. Every list
/// field defaults to empty so a sparse model answer still parses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredMinutes {
    pub summary: String,

    #[serde(default)]
    pub key_points: Vec<String>,

    #[serde(default)]
    pub decisions: Vec<String>,

    #[serde(default)]
    pub action_items: Vec<ActionItem>,

    #[serde(default)]
    pub next_steps: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionItem {
    pub task: String,

    #[serde(default)]
    pub owner: Option<String>,

    #[serde(default)]
    pub due: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MinutesError {
    #[error("minutes payload is not valid JSON: {0}")]
    Malformed(String),

    #[error("minutes payload has an empty summary")]
    EmptySummary,
}

impl StructuredMinutes {
    /// Parse a model answer into minutes.
    ///
    /// Models frequently wrap JSON in a Markdown code fence; the fence is
    /// stripped before parsing.
    pub fn from_model_output(raw: &str) -> Result<Self, MinutesError> {
        let body = strip_code_fence(raw);
        let minutes: StructuredMinutes =
            serde_json::from_str(body).map_err(|e| MinutesError::Malformed(e.to_string()))?;

        if minutes.summary.trim().is_empty() {
            return Err(MinutesError::EmptySummary);
        }
        Ok(minutes)
    }

    pub fn is_empty(&self) -> bool {
        self.key_points.is_empty()
            && self.decisions.is_empty()
            && self.action_items.is_empty()
            && self.next_steps.is_empty()
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip an optional language tag on the opening fence line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
