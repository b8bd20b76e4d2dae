//! Anthropic Messages API adapter.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Adapter, AdapterOutput, GenerationError};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Text generation through the Anthropic Messages API
pub struct AnthropicAdapter {
    api_key: Option<String>,
    client: Client,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

impl AnthropicAdapter {
    /// Create an adapter reading the key from `ANTHROPIC_API_KEY`
    pub fn from_env(max_tokens: u32) -> Self {
        let api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
        Self::new(api_key, API_URL, max_tokens)
    }

    /// Create an adapter against a custom endpoint
    pub fn new(api_key: Option<String>, base_url: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            api_key,
            client: Client::new(),
            base_url: base_url.into(),
            max_tokens,
            temperature: 0.7,
        }
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .with_context(|| format!("{} is not set", API_KEY_ENV))
    }
}

#[async_trait]
impl Adapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn execute(&self, action: &str, input: &str, timeout: Duration) -> Result<AdapterOutput> {
        let request = MessagesRequest {
            model: action,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: vec![Message {
                role: "user",
                content: input,
            }],
        };

        let response = self
            .client
            .post(&self.base_url)
            .timeout(timeout)
            .header("x-api-key", self.api_key()?)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::Error::new(GenerationError::Timeout(timeout))
                } else {
                    anyhow::Error::new(e).context("Anthropic request failed")
                }
            })?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = retry_after_ms(response.headers());
            return Err(GenerationError::RateLimited { retry_after_ms }.into());
        }

        if status.as_u16() == 529 {
            return Err(GenerationError::Overloaded.into());
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message,
            }
            .into());
        }

        let body: MessagesResponse = response
            .json()
            .await
            .context("Failed to decode Anthropic response")?;

        let content: String = body
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();

        let tokens_used = body.usage.map(|u| u.input_tokens + u.output_tokens);
        debug!(chars = content.len(), tokens = ?tokens_used, "Anthropic response received");

        Ok(AdapterOutput {
            content,
            tokens_used,
        })
    }

    async fn health_check(&self) -> Result<()> {
        self.api_key()?;
        Ok(())
    }
}

/// Server-requested wait from a `retry-after` header in seconds, 1s if absent
fn retry_after_ms(headers: &HeaderMap) -> u64 {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| secs.saturating_mul(1000))
        .unwrap_or(1000)
}
