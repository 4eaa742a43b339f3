//! The content pipeline's steps and their composition.
//!
//! ```text
//! scrape-article ──► ScrapeArticle ──► generate-content ──┬─► LinkedinGenerate ──► linkedin-schedule
//!                                                         └─► TwitterGenerate  ──► twitter-schedule
//! ```

pub mod generate;
pub mod scrape;

use std::sync::Arc;

use anyhow::Result;

use crate::adapters::{Generator, PromptLibrary, Scraper};
use crate::core::StepRegistry;

pub use generate::{GenerateStep, Platform};
pub use scrape::ScrapeStep;

/// External collaborators the steps depend on
#[derive(Clone)]
pub struct Collaborators {
    pub scraper: Arc<dyn Scraper>,
    pub generator: Arc<dyn Generator>,
}

/// Register the scrape step and one generation step per platform.
///
/// Fails on a missing prompt template or a duplicate step name; both are
/// fatal at startup.
pub fn register_pipeline(
    registry: &mut StepRegistry,
    collaborators: &Collaborators,
    prompts: &PromptLibrary,
) -> Result<()> {
    registry.register(ScrapeStep::new(Arc::clone(&collaborators.scraper)).descriptor())?;

    for platform in Platform::ALL {
        let template = prompts.get(platform.key())?.clone();
        let step = GenerateStep::new(platform, Arc::clone(&collaborators.generator), template);
        registry.register(step.descriptor())?;
    }

    Ok(())
}

/// Registry holding the full content pipeline
pub fn pipeline_registry(collaborators: &Collaborators, prompts: &PromptLibrary) -> Result<StepRegistry> {
    let mut registry = StepRegistry::new();
    register_pipeline(&mut registry, collaborators, prompts)?;
    Ok(registry)
}
