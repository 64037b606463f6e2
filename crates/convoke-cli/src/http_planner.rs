//! Planner backend over an OpenAI-compatible chat-completions API.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use convoke_core::planner::{ChatResponse, Message, Planner, Role};
use convoke_core::{Cancelled, TokenUsage};

// ── Wire types ────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Deserialize)]
struct ApiChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    prompt_cache_hit_tokens: u64,
    #[serde(default)]
    prompt_cache_miss_tokens: u64,
}

// ── Implementation ────────────────────────────────────────────────────────

/// [`Planner`] backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct HttpPlanner {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpPlanner {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    async fn request(&self, messages: &[Message]) -> Result<ChatResponse> {
        let api_messages = messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: m.content.clone(),
            })
            .collect();

        let body = ApiRequest {
            model: self.model.clone(),
            messages: api_messages,
        };

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("HTTP request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("API error {status}: {text}"));
        }

        let parsed: ApiResponse = resp.json().await.context("malformed API response")?;
        let text = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| anyhow!("API returned no content"))?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                cache_read_tokens: u.prompt_cache_hit_tokens,
                cache_write_tokens: u.prompt_cache_miss_tokens,
            })
            .unwrap_or_default();

        Ok(ChatResponse { text, usage })
    }
}

#[async_trait]
impl Planner for HttpPlanner {
    async fn chat(
        &self,
        cancel: CancellationToken,
        messages: &[Message],
    ) -> Result<ChatResponse> {
        tokio::select! {
            response = self.request(messages) => response,
            _ = cancel.cancelled() => {
                Err(anyhow::Error::new(Cancelled).context("planner call cancelled"))
            }
        }
    }
}
