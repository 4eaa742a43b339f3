//! Adapter interfaces for external collaborators.
//!
//! The pipeline depends on two narrow interfaces: a [`Scraper`] that turns a
//! URL into an article, and a [`Generator`] that turns a prompt into raw
//! model output. HTTP implementations live in the submodules; tests plug in
//! stubs.

pub mod firecrawl;
pub mod gemini;
pub mod prompts;

use async_trait::async_trait;
use thiserror::Error;

// Re-export the concrete adapters
pub use firecrawl::FirecrawlScraper;
pub use gemini::GeminiGenerator;
pub use prompts::{PromptLibrary, PromptTemplate};

/// Article returned by a scraper
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedArticle {
    pub title: String,
    /// Article body (markdown)
    pub content: String,
}

/// Network failure, non-success response or unparsable body from a scraper
#[derive(Debug, Clone, PartialEq, Error)]
#[error("scrape failed: {reason}")]
pub struct ScrapeError {
    pub reason: String,
}

impl ScrapeError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Quota, timeout or provider fault from a generator
#[derive(Debug, Clone, PartialEq, Error)]
#[error("generation failed: {reason}")]
pub struct GenerationError {
    pub reason: String,
}

impl GenerationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Failure of any external collaborator
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollaboratorError {
    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// URL -> article
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    async fn scrape(&self, url: &str) -> Result<ScrapedArticle, ScrapeError>;
}

/// Prompt -> raw model output
#[async_trait]
pub trait Generator: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}
