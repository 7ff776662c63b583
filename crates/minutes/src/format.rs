//! Rendering of structured minutes into a postable document.
//!
//! Formatting is pure: no I/O and no failure mode.

use core::str::FromStr;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use scribe_core::MeetingContext;

use crate::minutes::{ActionItem, StructuredMinutes};

/// Content type of a rendered document, as understood by the delivery service.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Html,
    Text,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Html => "html",
            ContentType::Text => "text",
        }
    }
}

/// A rendered, ready-to-post document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub content_type: ContentType,
    pub body: String,
}

/// Renders minutes for a meeting.
pub trait Formatter: Send + Sync {
    fn format(&self, minutes: &StructuredMinutes, context: &MeetingContext) -> Document;
}

/// Output format selected by configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MinutesFormat {
    #[default]
    Html,
    Markdown,
}

impl FromStr for MinutesFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "html" => Ok(Self::Html),
            "markdown" | "md" => Ok(Self::Markdown),
            other => Err(format!("unknown minutes format '{other}' (expected html or markdown)")),
        }
    }
}

impl Formatter for MinutesFormat {
    fn format(&self, minutes: &StructuredMinutes, context: &MeetingContext) -> Document {
        match self {
            MinutesFormat::Html => HtmlFormatter.format(minutes, context),
            MinutesFormat::Markdown => MarkdownFormatter.format(minutes, context),
        }
    }
}

fn title(context: &MeetingContext) -> String {
    if context.subject.trim().is_empty() {
        "Meeting minutes".to_string()
    } else {
        format!("Meeting minutes: {}", context.subject.trim())
    }
}

fn meta_line(context: &MeetingContext) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(start) = context.start {
        parts.push(start.format("%Y-%m-%d %H:%M UTC").to_string());
    }
    if let Some(minutes) = context.duration_minutes() {
        parts.push(format!("{minutes} min"));
    }
    if !context.participants.is_empty() {
        parts.push(format!("{} participants", context.participants.len()));
    }
    (!parts.is_empty()).then(|| parts.join(" · "))
}

fn action_item_line(item: &ActionItem) -> String {
    let mut line = item.task.clone();
    if let Some(owner) = &item.owner {
        line.push_str(&format!(" ({owner})"));
    }
    if let Some(due) = &item.due {
        line.push_str(&format!(", due {due}"));
    }
    line
}

/// HTML suitable for a chat message body.
#[derive(Debug, Copy, Clone, Default)]
pub struct HtmlFormatter;

impl HtmlFormatter {
    fn section(out: &mut String, heading: &str, items: impl IntoIterator<Item = String>) {
        let items: Vec<String> = items.into_iter().collect();
        if items.is_empty() {
            return;
        }
        let _ = write!(out, "<h3>{}</h3><ul>", escape_html(heading));
        for item in items {
            let _ = write!(out, "<li>{}</li>", escape_html(&item));
        }
        out.push_str("</ul>");
    }
}

impl Formatter for HtmlFormatter {
    fn format(&self, minutes: &StructuredMinutes, context: &MeetingContext) -> Document {
        let mut out = String::new();
        let _ = write!(out, "<h2>{}</h2>", escape_html(&title(context)));
        if let Some(meta) = meta_line(context) {
            let _ = write!(out, "<p><em>{}</em></p>", escape_html(&meta));
        }
        let _ = write!(out, "<p>{}</p>", escape_html(minutes.summary.trim()));

        Self::section(&mut out, "Key points", minutes.key_points.iter().cloned());
        Self::section(&mut out, "Decisions", minutes.decisions.iter().cloned());
        Self::section(
            &mut out,
            "Action items",
            minutes.action_items.iter().map(action_item_line),
        );
        Self::section(&mut out, "Next steps", minutes.next_steps.iter().cloned());

        Document {
            content_type: ContentType::Html,
            body: out,
        }
    }
}

/// Markdown, posted as plain text.
#[derive(Debug, Copy, Clone, Default)]
pub struct MarkdownFormatter;

impl MarkdownFormatter {
    fn section(out: &mut String, heading: &str, items: impl IntoIterator<Item = String>) {
        let items: Vec<String> = items.into_iter().collect();
        if items.is_empty() {
            return;
        }
        let _ = write!(out, "\n### {heading}\n\n");
        for item in items {
            let _ = writeln!(out, "- {item}");
        }
    }
}

impl Formatter for MarkdownFormatter {
    fn format(&self, minutes: &StructuredMinutes, context: &MeetingContext) -> Document {
        let mut out = format!("## {}\n", title(context));
        if let Some(meta) = meta_line(context) {
            let _ = write!(out, "\n_{meta}_\n");
        }
        let _ = write!(out, "\n{}\n", minutes.summary.trim());

        Self::section(&mut out, "Key points", minutes.key_points.iter().cloned());
        Self::section(&mut out, "Decisions", minutes.decisions.iter().cloned());
        Self::section(
            &mut out,
            "Action items",
            minutes.action_items.iter().map(|i| format!("[ ] {}", action_item_line(i))),
        );
        Self::section(&mut out, "Next steps", minutes.next_steps.iter().cloned());

        Document {
            content_type: ContentType::Text,
            body: out,
        }
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
