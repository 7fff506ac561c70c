use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use parley_core::config::{AgentConfig, AgentProvider};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_OUTPUT_TOKENS: u32 = 1_024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("llm provider is not configured: {0}")]
    NotConfigured(String),
    #[error("llm request failed: {0}")]
    Transport(String),
    #[error("llm provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("llm response could not be decoded: {0}")]
    Decode(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::NotConfigured(_) | Self::Decode(_) => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPrompt {
    pub system: String,
    pub user: String,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &ChatPrompt) -> Result<String, LlmError>;
}

/// Chat completion over HTTP for OpenAI-compatible, Anthropic and Ollama endpoints.
pub struct HttpLlmClient {
    client: Client,
    provider: AgentProvider,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
}

impl HttpLlmClient {
    pub fn from_config(config: &AgentConfig) -> Result<Self, LlmError> {
        let base_url = match (&config.base_url, config.provider) {
            (Some(url), _) => url.clone(),
            (None, AgentProvider::OpenAi) => "https://api.openai.com/v1".to_owned(),
            (None, AgentProvider::Anthropic) => "https://api.anthropic.com".to_owned(),
            (None, AgentProvider::Ollama) => "http://localhost:11434".to_owned(),
            (None, AgentProvider::Scripted) => {
                return Err(LlmError::NotConfigured(
                    "scripted provider has no HTTP endpoint".to_owned(),
                ))
            }
        };
        if matches!(config.provider, AgentProvider::OpenAi | AgentProvider::Anthropic)
            && config.api_key.is_none()
        {
            return Err(LlmError::NotConfigured("agent.api_key".to_owned()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| LlmError::NotConfigured(format!("http client: {error}")))?;

        Ok(Self {
            client,
            provider: config.provider,
            base_url: base_url.trim_end_matches('/').to_owned(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn endpoint(&self) -> String {
        match self.provider {
            AgentProvider::Anthropic => format!("{}/v1/messages", self.base_url),
            AgentProvider::Ollama => format!("{}/api/chat", self.base_url),
            AgentProvider::OpenAi | AgentProvider::Scripted => {
                format!("{}/chat/completions", self.base_url)
            }
        }
    }

    pub fn request_body(&self, prompt: &ChatPrompt) -> Value {
        match self.provider {
            AgentProvider::Anthropic => json!({
                "model": self.model,
                "max_tokens": MAX_OUTPUT_TOKENS,
                "system": prompt.system,
                "messages": [{ "role": "user", "content": prompt.user }],
            }),
            AgentProvider::Ollama => json!({
                "model": self.model,
                "stream": false,
                "messages": [
                    { "role": "system", "content": prompt.system },
                    { "role": "user", "content": prompt.user },
                ],
            }),
            AgentProvider::OpenAi | AgentProvider::Scripted => json!({
                "model": self.model,
                "messages": [
                    { "role": "system", "content": prompt.system },
                    { "role": "user", "content": prompt.user },
                ],
            }),
        }
    }

    pub fn extract_text(&self, body: &Value) -> Result<String, LlmError> {
        let text = match self.provider {
            AgentProvider::Anthropic => body["content"]
                .as_array()
                .map(|blocks| {
                    blocks
                        .iter()
                        .filter(|block| block["type"] == "text")
                        .filter_map(|block| block["text"].as_str())
                        .collect::<Vec<_>>()
                        .join("")
                }),
            AgentProvider::Ollama => body["message"]["content"].as_str().map(str::to_owned),
            AgentProvider::OpenAi | AgentProvider::Scripted => {
                body["choices"][0]["message"]["content"].as_str().map(str::to_owned)
            }
        };
        text.ok_or_else(|| LlmError::Decode("response has no text content".to_owned()))
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &ChatPrompt) -> Result<String, LlmError> {
        let url = self.endpoint();
        let mut request = self.client.post(&url).json(&self.request_body(prompt));
        if let Some(api_key) = &self.api_key {
            request = match self.provider {
                AgentProvider::Anthropic => request
                    .header("x-api-key", api_key.expose_secret())
                    .header("anthropic-version", ANTHROPIC_VERSION),
                _ => request.bearer_auth(api_key.expose_secret()),
            };
        }

        debug!(model = %self.model, url = %url, "calling llm provider");
        let response =
            request.send().await.map_err(|error| LlmError::Transport(error.to_string()))?;
        let status = response.status();
        let text = response.text().await.map_err(|error| LlmError::Transport(error.to_string()))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), model = %self.model, "llm provider returned an error");
            return Err(LlmError::Status { status: status.as_u16(), body: text });
        }

        let body: Value =
            serde_json::from_str(&text).map_err(|error| LlmError::Decode(error.to_string()))?;
        self.extract_text(&body)
    }
}

/// Replays queued responses, then falls back to a fixed acknowledgement.
/// Backs the `scripted` provider and tests.
#[derive(Clone, Default)]
pub struct ScriptedLlmClient {
    responses: Arc<Mutex<VecDeque<Result<String, LlmError>>>>,
    prompts: Arc<Mutex<Vec<ChatPrompt>>>,
}

impl ScriptedLlmClient {
    pub fn new<I>(responses: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let queued = responses.into_iter().map(Ok).collect();
        Self { responses: Arc::new(Mutex::new(queued)), prompts: Arc::default() }
    }

    pub fn push_error(&self, error: LlmError) {
        match self.responses.lock() {
            Ok(mut responses) => responses.push_back(Err(error)),
            Err(poisoned) => poisoned.into_inner().push_back(Err(error)),
        }
    }

    pub fn prompts(&self) -> Vec<ChatPrompt> {
        match self.prompts.lock() {
            Ok(prompts) => prompts.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, prompt: &ChatPrompt) -> Result<String, LlmError> {
        match self.prompts.lock() {
            Ok(mut prompts) => prompts.push(prompt.clone()),
            Err(poisoned) => poisoned.into_inner().push(prompt.clone()),
        }
        let next = match self.responses.lock() {
            Ok(mut responses) => responses.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.unwrap_or_else(|| {
            Ok("Thanks for reaching out! A member of our team is looking into this and will \
                follow up shortly."
                .to_owned())
        })
    }
}

pub fn build_llm_client(config: &AgentConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    match config.provider {
        AgentProvider::Scripted => Ok(Arc::new(ScriptedLlmClient::default())),
        _ => Ok(Arc::new(HttpLlmClient::from_config(config)?)),
    }
}
