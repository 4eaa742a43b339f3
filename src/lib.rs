//! postflow - Event-driven article to social post pipeline
//!
//! Given a URL, postflow scrapes the article, generates LinkedIn and
//! Twitter posts with a generative model, and hands them on for
//! scheduling. Every stage is a step connected to the next only by
//! named events carrying validated payloads.
//!
//! # Architecture
//!
//! - Steps declare the topics they consume and emit
//! - The bus validates each payload against each subscriber's schema
//! - Subscribers of one event run concurrently and fail independently
//! - Every derived event carries the run's correlation id (`requestId`)
//! - The journal records how each event settled
//!
//! # Modules
//!
//! - `adapters`: External collaborators (Firecrawl, Gemini, prompt templates)
//! - `core`: Orchestration (Schema, Registry, Context, Bus, Journal)
//! - `domain`: Data structures (Event, Invocation, payloads)
//! - `steps`: The concrete pipeline steps
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Generate posts for an article
//! postflow run https://example.com/article
//!
//! # Show the step topology
//! postflow topics
//!
//! # Check a payload against every subscriber of a topic
//! postflow validate generate-content payload.json
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod steps;

// Re-export main types at crate root for convenience
pub use crate::config::{Config, ConfigError};
pub use crate::core::{
    validate, EventBus, Schema, Step, StepContext, StepDescriptor, StepError, StepRegistry,
    ValidationError,
};
pub use crate::domain::{Event, EventState, FailureReason, Invocation, InvocationOutcome, Topic};
pub use crate::steps::{pipeline_registry, Collaborators};
