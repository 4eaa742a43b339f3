//! Typed payloads carried on the content pipeline topics.
//!
//! Each payload has a matching [`Schema`] that the bus checks before
//! decoding it into the struct.

use serde::{Deserialize, Serialize};

use crate::core::schema::{FieldType, Format, Schema};

/// Request to scrape an article
pub const SCRAPE_ARTICLE: &str = "scrape-article";

/// Scraped article ready for generation
pub const GENERATE_CONTENT: &str = "generate-content";

/// Generated LinkedIn post
pub const LINKEDIN_SCHEDULE: &str = "linkedin-schedule";

/// Generated Twitter thread
pub const TWITTER_SCHEDULE: &str = "twitter-schedule";

/// Payload of `scrape-article`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeArticle {
    pub request_id: String,
    pub url: String,
    /// Milliseconds since the epoch
    pub timestamp: i64,
}

impl ScrapeArticle {
    pub fn schema() -> Schema {
        Schema::new("ScrapeInput")
            .required_with("requestId", FieldType::String, Format::NonEmpty)
            .required_with("url", FieldType::String, Format::Url)
            .required("timestamp", FieldType::Integer)
    }
}

/// Payload of `generate-content`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContent {
    pub request_id: String,
    pub url: String,
    pub title: String,
    pub content: String,
    pub timestamp: i64,
}

impl GenerateContent {
    pub fn schema() -> Schema {
        Schema::new("GenerateInput")
            .required_with("requestId", FieldType::String, Format::NonEmpty)
            .required_with("url", FieldType::String, Format::Url)
            .required_with("title", FieldType::String, Format::NonEmpty)
            .required_with("content", FieldType::String, Format::NonEmpty)
            .required("timestamp", FieldType::Integer)
    }
}

/// Payload of `{platform}-schedule`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledContent {
    pub request_id: String,
    pub url: String,
    pub title: String,
    /// Structured post content, or the platform's raw-text fallback shape
    pub content: serde_json::Value,
    /// RFC 3339
    pub generated_at: String,
    pub original_url: String,
}

impl ScheduledContent {
    pub fn schema() -> Schema {
        Schema::new("ScheduleInput")
            .required_with("requestId", FieldType::String, Format::NonEmpty)
            .required_with("url", FieldType::String, Format::Url)
            .required("title", FieldType::String)
            .required("content", FieldType::Object)
            .required_with("generatedAt", FieldType::String, Format::DateTime)
            .required_with("originalUrl", FieldType::String, Format::Url)
    }
}
