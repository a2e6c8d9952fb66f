//! Gemini-based translation using the Generative AI API.

use crate::config::DEFAULT_GEMINI_BASE_URL;
use crate::error::{DubError, Result};
use crate::translate::{build_prompt, Translator};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Translator using Google Gemini API.
pub struct GeminiTranslator {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiTranslator {
    /// Create a new Gemini translator with the given API key.
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model: "gemini-2.0-flash".to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
        }
    }

    /// Set a different model (e.g., "gemini-1.5-pro").
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        )
    }
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize, Debug)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize, Debug)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Deserialize, Debug)]
struct GeminiResponseContent {
    parts: Option<Vec<GeminiResponsePart>>,
}

#[derive(Deserialize, Debug)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

#[async_trait]
impl Translator for GeminiTranslator {
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }

        debug!(
            "Translating {} chars {} -> {} with {}",
            text.len(),
            source_lang,
            target_lang,
            self.model
        );

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: build_prompt(text, source_lang, target_lang),
                }],
            }],
        };

        let response = self
            .client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await
            .map_err(|e| DubError::provider("Gemini", format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DubError::provider("Gemini", format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(DubError::provider(
                "Gemini",
                format!("API error ({}): {}", status, body),
            ));
        }

        let gemini_response: GeminiResponse = serde_json::from_str(&body).map_err(|e| {
            DubError::provider("Gemini", format!("failed to parse response: {}", e))
        })?;

        if let Some(error) = gemini_response.error {
            return Err(DubError::provider("Gemini", error.message));
        }

        let translated = gemini_response
            .candidates
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.content)
            .and_then(|c| c.parts)
            .and_then(|p| p.into_iter().next())
            .and_then(|p| p.text)
            .unwrap_or_default();

        if translated.trim().is_empty() {
            return Err(DubError::provider("Gemini", "empty translation returned"));
        }

        Ok(translated.trim().to_string())
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}
