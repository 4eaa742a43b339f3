//! Domain types for the postflow pipeline.
//!
//! This module contains the core data structures:
//! - Events: Immutable records flowing over topics, plus invocation records
//! - Payloads: Typed shapes of each pipeline topic
//! - Content: Structured vs raw generator output

pub mod content;
pub mod events;
pub mod payloads;

// Re-export commonly used types
pub use content::{parse_structured, ParsedContent};
pub use events::{
    Event, EventId, EventState, FailureReason, Invocation, InvocationOutcome, Topic,
};
pub use payloads::{GenerateContent, ScheduledContent, ScrapeArticle};
