//! `scribe-core`: payload and identifier building blocks.
//!
//! This crate contains **pure** types shared by ingestion, the job queue and the
//! meeting processor (no I/O, no async).

pub mod error;
pub mod id;
pub mod meeting;

pub use error::{DomainError, DomainResult};
pub use id::{CorrelationId, JobId};
pub use meeting::{MeetingContext, MeetingRef};
