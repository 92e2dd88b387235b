use serde_json::{json, Value};
use std::future::Future;
use thiserror::Error;
use tracing::debug;

use super::PipelineError;
use crate::config::ClassifierConfig;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// Something that turns a prompt into a short completion
pub trait CompletionClient: Send + Sync {
    fn complete(&self, prompt: &str) -> impl Future<Output = Result<String, ClientError>> + Send;
}

/// Chat completions client for OpenAI-compatible endpoints
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, config: &ClassifierConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            endpoint: completions_endpoint(&config.api_base_url),
            api_key: api_key.into(),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    /// Build a client from `OPENAI_API_KEY`, failing when it is unset or blank
    pub fn from_env(config: &ClassifierConfig) -> Result<Self, PipelineError> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or(PipelineError::MissingCredential(API_KEY_ENV))?;

        Ok(Self::new(api_key, config)?)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl CompletionClient for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String, ClientError> {
        let request_body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": self.system_prompt },
                { "role": "user", "content": prompt }
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let response_body: Value = response.json().await?;
        let content = parse_completion(&response_body)?;
        debug!(model = %self.model, chars = content.len(), "Received completion");
        Ok(content)
    }
}

/// `<base>/chat/completions`, tolerating a trailing slash on the base URL
fn completions_endpoint(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

/// Trimmed text of the first choice
fn parse_completion(body: &Value) -> Result<String, ClientError> {
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(|content| content.trim().to_string())
        .ok_or_else(|| ClientError::MalformedResponse("missing choices[0].message.content".to_string()))
}
