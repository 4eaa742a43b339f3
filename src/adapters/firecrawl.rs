//! Firecrawl scraper over its REST API.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ScraperConfig;

use super::{ScrapeError, ScrapedArticle, Scraper};

/// Title used when the page has none
pub const UNTITLED: &str = "Untitled Article";

/// Scraper backed by `POST {base_url}/v1/scrape`
pub struct FirecrawlScraper {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    data: Option<ScrapeData>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScrapeData {
    markdown: Option<String>,
    #[serde(default)]
    metadata: ScrapeMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct ScrapeMetadata {
    title: Option<String>,
}

impl FirecrawlScraper {
    /// Build from config. Credentials must already be present.
    pub fn from_config(config: &ScraperConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build HTTP client for Firecrawl")?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().unwrap_or_default(),
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/scrape", self.base_url)
    }
}

fn into_article(response: ScrapeResponse) -> Result<ScrapedArticle, ScrapeError> {
    if !response.success {
        return Err(ScrapeError::new(
            response
                .error
                .unwrap_or_else(|| "Firecrawl reported failure".to_string()),
        ));
    }

    let data = response
        .data
        .ok_or_else(|| ScrapeError::new("Firecrawl response has no data"))?;

    let title = data
        .metadata
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| UNTITLED.to_string());

    Ok(ScrapedArticle {
        title,
        content: data.markdown.unwrap_or_default(),
    })
}

#[async_trait]
impl Scraper for FirecrawlScraper {
    fn name(&self) -> &str {
        "firecrawl"
    }

    async fn scrape(&self, url: &str) -> Result<ScrapedArticle, ScrapeError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "url": url,
                "formats": ["markdown"],
            }))
            .send()
            .await
            .map_err(|e| ScrapeError::new(format!("request to Firecrawl failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScrapeError::new(format!(
                "Firecrawl returned {}: {}",
                status,
                body.trim()
            )));
        }

        let parsed: ScrapeResponse = response
            .json()
            .await
            .map_err(|e| ScrapeError::new(format!("unparsable Firecrawl response: {}", e)))?;

        into_article(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Result<ScrapedArticle, ScrapeError> {
        into_article(serde_json::from_str(body).unwrap())
    }

    #[test]
    fn test_successful_response() {
        let article = parse(
            r##"{"success": true, "data": {"markdown": "# Hi", "metadata": {"title": "Hello"}}}"##,
        )
        .unwrap();
        assert_eq!(article.title, "Hello");
        assert_eq!(article.content, "# Hi");
    }

    #[test]
    fn test_missing_title_falls_back() {
        let article = parse(r#"{"success": true, "data": {"markdown": "body"}}"#).unwrap();
        assert_eq!(article.title, UNTITLED);

        let article =
            parse(r#"{"success": true, "data": {"metadata": {"title": "  "}}}"#).unwrap();
        assert_eq!(article.title, UNTITLED);
        assert_eq!(article.content, "");
    }

    #[test]
    fn test_reported_failure() {
        let err = parse(r#"{"success": false, "error": "blocked"}"#).unwrap_err();
        assert_eq!(err.reason, "blocked");
    }

    #[test]
    fn test_endpoint() {
        let config = ScraperConfig {
            base_url: "https://api.firecrawl.dev/".to_string(),
            ..Default::default()
        };
        let scraper = FirecrawlScraper::from_config(&config).unwrap();
        assert_eq!(scraper.endpoint(), "https://api.firecrawl.dev/v1/scrape");
        assert_eq!(scraper.name(), "firecrawl");
    }
}
