//! Scrape step: `scrape-article` -> `generate-content`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::adapters::Scraper;
use crate::core::{Step, StepContext, StepDescriptor, StepError};
use crate::domain::payloads::{GENERATE_CONTENT, SCRAPE_ARTICLE};
use crate::domain::{GenerateContent, ScrapeArticle};

pub const NAME: &str = "ScrapeArticle";

/// Fetches the article behind a URL and hands it on for generation
pub struct ScrapeStep {
    scraper: Arc<dyn Scraper>,
}

impl ScrapeStep {
    pub fn new(scraper: Arc<dyn Scraper>) -> Self {
        Self { scraper }
    }

    pub fn descriptor(self) -> StepDescriptor {
        StepDescriptor::new(NAME, self)
            .subscribe(SCRAPE_ARTICLE)
            .declare_emit(GENERATE_CONTENT)
            .input_schema(ScrapeArticle::schema())
    }
}

#[async_trait]
impl Step for ScrapeStep {
    type Input = ScrapeArticle;

    async fn handle(&self, input: ScrapeArticle, ctx: &dyn StepContext) -> Result<(), StepError> {
        ctx.info(
            "Scraping article",
            &[("url", &input.url), ("scraper", &self.scraper.name())],
        );

        let article = self.scraper.scrape(&input.url).await?;

        ctx.info(
            "Scraped article",
            &[("title", &article.title), ("chars", &article.content.len())],
        );

        ctx.emit_payload(
            GENERATE_CONTENT,
            &GenerateContent {
                request_id: input.request_id,
                url: input.url,
                title: article.title,
                content: article.content,
                timestamp: input.timestamp,
            },
        )?;

        Ok(())
    }
}
