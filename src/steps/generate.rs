//! Generation steps: `generate-content` -> `{platform}-schedule`.
//!
//! One step per platform, all subscribed to the same topic. Each renders
//! its own prompt, calls the generator, and emits whatever came back:
//! structured JSON when the model produced it, the platform's raw-text
//! shape otherwise.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::adapters::{Generator, PromptTemplate};
use crate::core::{Step, StepContext, StepDescriptor, StepError};
use crate::domain::payloads::{GENERATE_CONTENT, LINKEDIN_SCHEDULE, TWITTER_SCHEDULE};
use crate::domain::{parse_structured, GenerateContent, ScheduledContent};

/// Target social platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    LinkedIn,
    Twitter,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::LinkedIn, Platform::Twitter];

    /// Key used for prompt templates
    pub fn key(&self) -> &'static str {
        match self {
            Self::LinkedIn => "linkedin",
            Self::Twitter => "twitter",
        }
    }

    pub fn step_name(&self) -> &'static str {
        match self {
            Self::LinkedIn => "LinkedinGenerate",
            Self::Twitter => "TwitterGenerate",
        }
    }

    pub fn schedule_topic(&self) -> &'static str {
        match self {
            Self::LinkedIn => LINKEDIN_SCHEDULE,
            Self::Twitter => TWITTER_SCHEDULE,
        }
    }

    /// Wrap unstructured model output in the platform's content shape
    pub fn fallback(&self, raw: String) -> Value {
        match self {
            Self::LinkedIn => json!({ "post": raw }),
            Self::Twitter => json!({ "thread": [{ "tweetNumber": 1, "content": raw }] }),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Generates content for one platform
pub struct GenerateStep {
    platform: Platform,
    generator: Arc<dyn Generator>,
    template: PromptTemplate,
}

impl GenerateStep {
    pub fn new(platform: Platform, generator: Arc<dyn Generator>, template: PromptTemplate) -> Self {
        Self {
            platform,
            generator,
            template,
        }
    }

    pub fn descriptor(self) -> StepDescriptor {
        let platform = self.platform;
        StepDescriptor::new(platform.step_name(), self)
            .subscribe(GENERATE_CONTENT)
            .declare_emit(platform.schedule_topic())
            .input_schema(GenerateContent::schema())
    }
}

#[async_trait]
impl Step for GenerateStep {
    type Input = GenerateContent;

    async fn handle(&self, input: GenerateContent, ctx: &dyn StepContext) -> Result<(), StepError> {
        let prompt = self.template.render(&input.title, &input.content);

        ctx.info(
            "Content generation started",
            &[("platform", &self.platform), ("prompt_chars", &prompt.len())],
        );

        let raw = self.generator.generate(&prompt).await?;

        let parsed = parse_structured(&raw);
        if !parsed.is_structured() {
            ctx.warn(
                "Model output is not a JSON object; using raw text",
                &[("platform", &self.platform), ("chars", &raw.len())],
            );
        }
        let content = parsed.into_value_or(|text| self.platform.fallback(text));

        ctx.emit_payload(
            self.platform.schedule_topic(),
            &ScheduledContent {
                request_id: input.request_id,
                url: input.url.clone(),
                title: input.title,
                content,
                generated_at: Utc::now().to_rfc3339(),
                original_url: input.url,
            },
        )?;

        ctx.info("Content generated", &[("platform", &self.platform)]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_shapes() {
        assert_eq!(
            Platform::Twitter.fallback("Hello".into()),
            json!({"thread": [{"tweetNumber": 1, "content": "Hello"}]})
        );
        assert_eq!(
            Platform::LinkedIn.fallback("Hello".into()),
            json!({"post": "Hello"})
        );
    }

    #[test]
    fn test_platform_topics() {
        assert_eq!(Platform::LinkedIn.schedule_topic(), "linkedin-schedule");
        assert_eq!(Platform::Twitter.schedule_topic(), "twitter-schedule");
        assert_eq!(Platform::Twitter.to_string(), "twitter");
    }
}
