//! `scribe-minutes`
//!
//! **Responsibility:** the content boundary of the pipeline.
//!
//! - The structured minutes model the generator must produce.
//! - Pure rendering of minutes into a postable document.
//! - Transcript text preparation (WebVTT flattening, input bounding).
//!
//! Nothing here performs I/O.

pub mod format;
pub mod minutes;
pub mod transcript;

pub use format::{ContentType, Document, Formatter, HtmlFormatter, MarkdownFormatter, MinutesFormat};
pub use minutes::{ActionItem, MinutesError, StructuredMinutes};
pub use transcript::{truncate_chars, vtt_to_text};
