//! Gemini text generation over the Generative Language REST API.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::GeneratorConfig;

use super::{GenerationError, Generator};

/// Generator backed by `POST {base_url}/v1beta/models/{model}:generateContent`
pub struct GeminiGenerator {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl GeminiGenerator {
    /// Build from config. Credentials must already be present.
    pub fn from_config(config: &GeneratorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build HTTP client for Gemini")?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().unwrap_or_default(),
            model: config.model.clone(),
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

/// Concatenate the text parts of the first candidate
fn extract_text(response: GenerateResponse) -> Result<String, GenerationError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| GenerationError::new("model returned no candidates"))?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".to_string());
        return Err(GenerationError::new(format!(
            "model returned no text (finish reason: {})",
            reason
        )));
    }

    Ok(text)
}

fn status_error(status: StatusCode, body: &str) -> GenerationError {
    let detail = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.trim().to_string());

    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            GenerationError::new(format!("quota exceeded: {}", detail))
        }
        _ => GenerationError::new(format!("provider returned {}: {}", status, detail)),
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&serde_json::json!({
                "contents": [{ "parts": [{ "text": prompt }] }],
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::new(format!("request timed out: {}", e))
                } else {
                    GenerationError::new(format!("request to Gemini failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::new(format!("unparsable Gemini response: {}", e)))?;

        extract_text(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_text_joins_parts() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"parts": [{"text": "Hello "}, {"text": "world"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), "Hello world");
    }

    #[test]
    fn test_extract_text_without_candidates() {
        let response: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(extract_text(response).is_err());
    }

    #[test]
    fn test_blocked_candidate_reports_finish_reason() {
        let response: GenerateResponse =
            serde_json::from_str(r#"{"candidates": [{"finishReason": "SAFETY"}]}"#).unwrap();
        let err = extract_text(response).unwrap_err();
        assert!(err.reason.contains("SAFETY"));
    }

    #[test]
    fn test_quota_status() {
        let err = status_error(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": {"message": "Resource exhausted"}}"#,
        );
        assert_eq!(err.reason, "quota exceeded: Resource exhausted");

        let err = status_error(StatusCode::INTERNAL_SERVER_ERROR, "oops");
        assert!(err.reason.contains("oops"));
    }

    #[test]
    fn test_endpoint() {
        let config = GeneratorConfig::default();
        let generator = GeminiGenerator::from_config(&config).unwrap();
        assert_eq!(
            generator.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }
}
