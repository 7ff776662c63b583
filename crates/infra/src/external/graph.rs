//! Meetings, transcripts and chat messages over the Graph REST API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use scribe_core::MeetingContext;
use scribe_minutes::Document;

use crate::ports::{CallContext, ChatDelivery, MeetingDirectory, TranscriptRef, TranscriptSource};

use super::{check_status, CallError, CLIENT_REQUEST_ID};

const SERVICE: &str = "graph";

#[derive(Debug, Clone)]
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
}

impl GraphClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn request(&self, method: Method, segments: &[&str], ctx: &CallContext) -> RequestBuilder {
        let mut url = self.base_url.clone();
        for segment in segments {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        self.http
            .request(method, url)
            .bearer_auth(&ctx.access_token)
            .header(CLIENT_REQUEST_ID, ctx.correlation_id.to_string())
    }

    async fn send(request: RequestBuilder) -> Result<reqwest::Response, CallError> {
        let response = request
            .send()
            .await
            .map_err(|e| CallError::from_reqwest(SERVICE, e))?;
        check_status(SERVICE, response).await
    }
}

// Wire types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OnlineMeeting {
    subject: Option<String>,
    start_date_time: Option<DateTime<Utc>>,
    end_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    participants: Participants,
}

#[derive(Debug, Default, Deserialize)]
struct Participants {
    organizer: Option<Participant>,
    #[serde(default)]
    attendees: Vec<Participant>,
}

#[derive(Debug, Deserialize)]
struct Participant {
    upn: Option<String>,
    identity: Option<IdentitySet>,
}

#[derive(Debug, Deserialize)]
struct IdentitySet {
    user: Option<Identity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Identity {
    display_name: Option<String>,
}

impl Participant {
    fn name(&self) -> Option<String> {
        self.identity
            .as_ref()
            .and_then(|i| i.user.as_ref())
            .and_then(|u| u.display_name.clone())
            .or_else(|| self.upn.clone())
            .filter(|n| !n.trim().is_empty())
    }
}

impl From<OnlineMeeting> for MeetingContext {
    fn from(meeting: OnlineMeeting) -> Self {
        let organizer = meeting.participants.organizer.as_ref().and_then(Participant::name);
        let mut participants: Vec<String> = organizer.iter().cloned().collect();
        for name in meeting.participants.attendees.iter().filter_map(Participant::name) {
            if !participants.contains(&name) {
                participants.push(name);
            }
        }

        MeetingContext {
            subject: meeting.subject.unwrap_or_default(),
            start: meeting.start_date_time,
            end: meeting.end_date_time,
            organizer,
            participants,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Collection<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranscriptItem {
    id: String,
    created_date_time: Option<DateTime<Utc>>,
}

#[async_trait]
impl MeetingDirectory for GraphClient {
    #[instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id), err)]
    async fn meeting_context(
        &self,
        ctx: &CallContext,
        user_id: &str,
        meeting_id: &str,
    ) -> Result<MeetingContext, CallError> {
        let request = self.request(
            Method::GET,
            &["users", user_id, "onlineMeetings", meeting_id],
            ctx,
        );
        let meeting: OnlineMeeting = Self::send(request)
            .await?
            .json()
            .await
            .map_err(|e| CallError::from_reqwest(SERVICE, e))?;

        Ok(meeting.into())
    }
}

#[async_trait]
impl TranscriptSource for GraphClient {
    #[instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id), err)]
    async fn list_transcripts(
        &self,
        ctx: &CallContext,
        user_id: &str,
        meeting_id: &str,
    ) -> Result<Vec<TranscriptRef>, CallError> {
        let request = self.request(
            Method::GET,
            &["users", user_id, "onlineMeetings", meeting_id, "transcripts"],
            ctx,
        );
        let items: Collection<TranscriptItem> = Self::send(request)
            .await?
            .json()
            .await
            .map_err(|e| CallError::from_reqwest(SERVICE, e))?;

        debug!(count = items.value.len(), "listed transcripts");
        Ok(items
            .value
            .into_iter()
            .map(|t| TranscriptRef {
                id: t.id,
                created_at: t.created_date_time,
            })
            .collect())
    }

    #[instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id), err)]
    async fn transcript_content(
        &self,
        ctx: &CallContext,
        user_id: &str,
        meeting_id: &str,
        transcript_id: &str,
    ) -> Result<String, CallError> {
        let request = self
            .request(
                Method::GET,
                &[
                    "users",
                    user_id,
                    "onlineMeetings",
                    meeting_id,
                    "transcripts",
                    transcript_id,
                    "content",
                ],
                ctx,
            )
            .query(&[("$format", "text/vtt")])
            .header(reqwest::header::ACCEPT, "text/vtt");

        let content = Self::send(request)
            .await?
            .text()
            .await
            .map_err(|e| CallError::from_reqwest(SERVICE, e))?;

        if content.trim().is_empty() {
            return Err(CallError::invalid(SERVICE, "transcript content is empty"));
        }
        Ok(content)
    }
}

#[async_trait]
impl ChatDelivery for GraphClient {
    #[instrument(skip(self, ctx, document), fields(correlation_id = %ctx.correlation_id), err)]
    async fn post_message(
        &self,
        ctx: &CallContext,
        chat_id: &str,
        document: &Document,
    ) -> Result<(), CallError> {
        let request = self
            .request(Method::POST, &["chats", chat_id, "messages"], ctx)
            .json(&json!({
                "body": {
                    "contentType": document.content_type.as_str(),
                    "content": document.body,
                }
            }));

        Self::send(request).await?;
        Ok(())
    }
}
