//! Minutes generation through an OpenAI-compatible chat completions API.

use std::fmt::Write as _;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use scribe_core::{CorrelationId, MeetingContext};
use scribe_minutes::StructuredMinutes;

use crate::config::{GenerationConfig, Secret};
use crate::ports::MinutesGenerator;

use super::{check_status, CallError, CLIENT_REQUEST_ID};

const SERVICE: &str = "openai";

const SYSTEM_PROMPT: &str = "You write concise, factual meeting minutes from a transcript. \
Respond with a single JSON object and nothing else, using exactly these keys: \
\"summary\" (string, 2-5 sentences), \
\"key_points\" (array of strings), \
\"decisions\" (array of strings), \
\"action_items\" (array of objects with \"task\" (string), \"owner\" (string or null), \"due\" (string or null)), \
\"next_steps\" (array of strings). \
Use empty arrays when the transcript has nothing for a section. \
Only attribute owners who are named in the transcript.";

#[derive(Debug, Clone)]
pub struct OpenAiGenerator {
    http: reqwest::Client,
    endpoint: String,
    api_key: Secret,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(http: reqwest::Client, config: &GenerationConfig) -> Self {
        Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }
}

fn user_prompt(transcript: &str, context: &MeetingContext) -> String {
    let mut prompt = String::new();
    if !context.subject.is_empty() {
        let _ = writeln!(prompt, "Meeting: {}", context.subject);
    }
    if let Some(start) = context.start {
        let _ = writeln!(prompt, "Date: {}", start.format("%Y-%m-%d"));
    }
    if !context.participants.is_empty() {
        let _ = writeln!(prompt, "Participants: {}", context.participants.join(", "));
    }
    let _ = write!(prompt, "\nTranscript:\n{transcript}");
    prompt
}

#[derive(Debug, Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
}

#[async_trait]
impl MinutesGenerator for OpenAiGenerator {
    #[instrument(skip(self, transcript, context), fields(input_chars = transcript.len()), err)]
    async fn generate(
        &self,
        correlation_id: CorrelationId,
        transcript: &str,
        context: &MeetingContext,
    ) -> Result<StructuredMinutes, CallError> {
        let body = json!({
            "model": self.model,
            "temperature": 0.2,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_prompt(transcript, context) },
            ],
        });

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose())
            .header(CLIENT_REQUEST_ID, correlation_id.to_string())
            .json(&body)
            .send()
            .await
            .map_err(|e| CallError::from_reqwest(SERVICE, e))?;

        let completion: Completion = check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| CallError::from_reqwest(SERVICE, e))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CallError::invalid(SERVICE, "completion has no message content"))?;

        let minutes = StructuredMinutes::from_model_output(&content)
            .map_err(|e| CallError::invalid(SERVICE, e.to_string()))?;
        debug!(
            key_points = minutes.key_points.len(),
            action_items = minutes.action_items.len(),
            "minutes generated"
        );
        Ok(minutes)
    }
}
