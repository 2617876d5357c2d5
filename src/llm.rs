//! Hosted LLM collaborator.
//!
//! The build only needs "prompt in, code out". [`CodeGenerator`] is that
//! seam; [`ChatCompletionsClient`] implements it against any
//! OpenAI-compatible chat-completions endpoint (Groq by default).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{BuilderError, Result};

/// Abstraction over the code-generating LLM for testability.
/// Real implementation: `ChatCompletionsClient`. Test double: `MockGenerator`.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Send a system + user message pair and return the generated text.
    async fn generate(&self, system: &str, prompt: &str) -> Result<String>;

    /// Model identifier, recorded in build metadata.
    fn model(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Pull `choices[0].message.content` out of a chat-completions body.
fn extract_content(body: &str) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| BuilderError::Upstream(format!("malformed response: {}", e)))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .map(|c| c.trim().to_string())
        .ok_or_else(|| BuilderError::Upstream("response has no choices[0].message.content".into()))
}

pub struct ChatCompletionsClient {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl ChatCompletionsClient {
    pub fn new(settings: LlmSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| BuilderError::Upstream(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http, settings })
    }

    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }
}

#[async_trait]
impl CodeGenerator for ChatCompletionsClient {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        let Some(api_key) = self.settings.api_key.as_deref().filter(|k| !k.is_empty()) else {
            return Err(BuilderError::Upstream(
                "no API key configured for the code-generation LLM".into(),
            ));
        };

        let request = ChatRequest {
            model: &self.settings.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        tracing::info!(
            url = %self.settings.url,
            model = %self.settings.model,
            prompt_chars = prompt.len(),
            "requesting code generation"
        );

        let resp = self
            .http
            .post(&self.settings.url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| BuilderError::Upstream(format!("request failed: {}", e)))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| BuilderError::Upstream(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(BuilderError::Upstream(format!("{}: {}", status, body.trim())));
        }
        extract_content(&body)
    }

    fn model(&self) -> &str {
        &self.settings.model
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Returns a canned reply (or error) and records every prompt it sees.
    pub struct MockGenerator {
        reply: std::result::Result<String, String>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl MockGenerator {
        pub fn replying(code: &str) -> Self {
            Self {
                reply: Ok(code.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(message: &str) -> Self {
            Self {
                reply: Err(message.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CodeGenerator for MockGenerator {
        async fn generate(&self, _system: &str, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone().map_err(BuilderError::Upstream)
        }

        fn model(&self) -> &str {
            "mock-model"
        }
    }
}
