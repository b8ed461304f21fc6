//! Gemini `generateContent` backend.

use crate::ai::Generator;
use crate::config::GenerationConfig;
use crate::error::{BotError, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;

// ── Configuration ──────────────────────────────────────────────

/// Connection settings for the Gemini API.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    /// Defaults to `https://generativelanguage.googleapis.com`.
    pub base_url: String,
    /// Model identifier (e.g. `"gemini-2.0-flash-lite"`).
    pub model: String,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://generativelanguage.googleapis.com".to_owned(),
            model: model.into(),
            timeout: Duration::from_secs(20),
        }
    }

    /// Build from the `[generation]` section and a resolved key.
    pub fn from_settings(settings: &GenerationConfig, api_key: impl Into<String>) -> Self {
        Self::new(api_key, settings.model.clone())
            .with_base_url(settings.api_base_url.clone())
            .with_timeout(Duration::from_secs(settings.timeout_secs.max(1)))
    }

    /// Set the base URL (mock servers in tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// ── Request / response ─────────────────────────────────────────

/// Single-turn `generateContent` body.
#[must_use]
pub fn build_request(prompt: &str) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [{ "text": prompt }]
        }]
    })
}

/// Concatenate the text parts of the first candidate.
///
/// A response without text is `InvalidInput` when the prompt was blocked
/// and `Transient` otherwise.
pub fn extract_text(body: &Value) -> Result<String> {
    let parts = body
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array);
    let text: String = parts
        .into_iter()
        .flatten()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if !text.trim().is_empty() {
        return Ok(text);
    }
    if let Some(reason) = body
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return Err(BotError::InvalidInput(format!("prompt blocked: {reason}")));
    }
    Err(BotError::Transient("generation returned no text".to_owned()))
}

/// Human-readable message from a Gemini error body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_else(|| body.chars().take(300).collect())
}

// ── Generator ──────────────────────────────────────────────────

pub struct GeminiGenerator {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiGenerator {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BotError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    #[must_use]
    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(BotError::InvalidInput("prompt is empty".to_owned()));
        }
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url, self.config.model
        );
        tracing::debug!(model = %self.config.model, "sending generation request");
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&build_request(prompt))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BotError::from_status(
                status,
                "generation",
                &extract_error_message(&body),
            ));
        }
        let body: Value = response.json().await?;
        extract_text(&body)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn request_carries_prompt_as_single_user_part() {
        let body = build_request("hello");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["contents"][0]["role"], "user");
    }

    #[test]
    fn text_parts_are_joined() {
        let body = json!({
            "candidates": [{ "content": { "parts": [{ "text": "Use " }, { "text": "iterators." }] } }]
        });
        assert_eq!(extract_text(&body).unwrap(), "Use iterators.");
    }

    #[test]
    fn blocked_prompt_is_invalid_input() {
        let body = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        assert!(matches!(extract_text(&body), Err(BotError::InvalidInput(_))));
    }

    #[test]
    fn empty_candidates_are_transient() {
        assert!(matches!(
            extract_text(&json!({ "candidates": [] })),
            Err(BotError::Transient(_))
        ));
    }

    #[test]
    fn error_message_is_extracted() {
        let body = r#"{"error":{"code":400,"message":"API key not valid"}}"#;
        assert_eq!(extract_error_message(body), "API key not valid");
        assert_eq!(extract_error_message("plain"), "plain");
    }

    #[test]
    fn settings_override_defaults() {
        let settings = GenerationConfig {
            api_base_url: "http://localhost:9/".to_owned(),
            timeout_secs: 3,
            ..Default::default()
        };
        let config = GeminiConfig::from_settings(&settings, "key");
        assert_eq!(config.base_url, "http://localhost:9");
        assert_eq!(config.model, "gemini-2.0-flash-lite");
        assert_eq!(config.timeout, Duration::from_secs(3));
    }
}
