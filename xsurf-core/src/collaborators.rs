//! Interfaces to the stages that consume discovered surfaces, plus an
//! OpenAI-compatible mutation client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use xsurf_scanner::Surface;

/// Produces candidate payload variants for a payload that did not fire.
#[async_trait]
pub trait MutationGenerator: Send + Sync {
    async fn generate(&self, failed_payload: &str) -> Vec<String>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub success: bool,
    pub evidence: Option<String>,
}

/// Checks whether a payload executes at a URL.
#[async_trait]
pub trait PayloadVerifier: Send + Sync {
    async fn verify(&self, url: &str, payload: &str) -> Verification;
}

#[derive(Debug, Clone, Default)]
pub struct Triage {
    pub prioritized: Vec<Surface>,
    pub discarded: Vec<Surface>,
}

/// Splits a surface list into the subset worth testing first and the rest.
#[async_trait]
pub trait SurfaceSummarizer: Send + Sync {
    async fn summarize(&self, surfaces: Vec<Surface>) -> Triage;
}

const SYSTEM_PROMPT: &str = "You are a security expert specializing in XSS payload mutation.";

fn mutation_prompt(failed_payload: &str) -> String {
    format!(
        "The XSS payload `{}` was blocked or did not execute.\n\
         Generate 3 variants likely to get past WAFs and input filters. Consider \
         double URL encoding, HTML entities, unicode escapes, case and whitespace \
         tricks, polyglots, and alternative tags or event handlers such as <svg>, \
         <details ontoggle> or onanimationstart.\n\
         Reply with a bare JSON array of strings and nothing else.",
        failed_payload
    )
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    content: String,
}

/// [`MutationGenerator`] backed by a `/chat/completions` endpoint.
pub struct ChatMutationGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl ChatMutationGenerator {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.7,
        })
    }

    /// Reads `XSURF_LLM_BASE_URL`, `XSURF_LLM_API_KEY` and `XSURF_LLM_MODEL`.
    pub fn from_env() -> Result<Self, String> {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| format!("{} is not set", name))
        };
        Self::new(
            var("XSURF_LLM_BASE_URL")?,
            var("XSURF_LLM_API_KEY")?,
            var("XSURF_LLM_MODEL")?,
        )
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    async fn request(&self, failed_payload: &str) -> Result<Vec<String>, String> {
        let prompt = mutation_prompt(failed_payload);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?
            .error_for_status()
            .map_err(|e| format!("bad status: {}", e))?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| format!("unexpected response body: {}", e))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| "response had no choices".to_string())?;

        let stripped = strip_code_fences(&content);
        serde_json::from_str::<Vec<String>>(stripped)
            .map_err(|_| format!("model did not return a JSON string array: {}", content))
    }
}

#[async_trait]
impl MutationGenerator for ChatMutationGenerator {
    async fn generate(&self, failed_payload: &str) -> Vec<String> {
        match self.request(failed_payload).await {
            Ok(mutations) => {
                debug!("Model proposed {} mutations", mutations.len());
                mutations
            }
            Err(e) => {
                warn!("Mutation generation failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// Remove a surrounding Markdown code fence (with or without a language tag).
pub fn strip_code_fences(content: &str) -> &str {
    let mut text = content.trim();
    if let Some(rest) = text.strip_prefix("```") {
        text = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => rest.trim_start_matches("json"),
        };
    }
    if let Some(rest) = text.trim_end().strip_suffix("```") {
        text = rest;
    }
    text.trim()
}
