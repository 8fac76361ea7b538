//! Text-generation collaborators used by the model-backed planner.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{LlmProvider, LlmSettings};

const OPENAI_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("text generation endpoint not reachable at {0}")]
    Unreachable(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("response carried no text: {0}")]
    EmptyResponse(String),

    #[error("{0} not set in environment")]
    MissingKey(&'static str),
}

/// One prompt in, one block of text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;

    fn describe(&self) -> String;
}

/// Ollama `/api/generate` with a tags healthcheck and linear-backoff retries.
pub struct OllamaClient {
    client: Client,
    host: String,
    model: String,
    temperature: f32,
    retries: u32,
    backoff: Duration,
    health_timeout: Duration,
}

impl OllamaClient {
    pub fn new(host: &str, model: &str) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(45))
            .build()?;
        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature: 0.2,
            retries: 3,
            backoff: Duration::from_millis(700),
            health_timeout: Duration::from_secs(3),
        })
    }

    /// Base delay; attempt `n` waits `n * backoff` before the next one.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn healthcheck(&self) -> bool {
        let url = format!("{}/api/tags", self.host);
        let result = self
            .client
            .get(&url)
            .timeout(self.health_timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        match result {
            Ok(_) => true,
            Err(e) => {
                warn!(host = %self.host, error = %e, "ollama healthcheck failed");
                false
            }
        }
    }

    async fn post_once(&self, payload: &Value) -> Result<Value, LlmError> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.host))
            .json(payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl TextGenerator for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        if !self.healthcheck().await {
            return Err(LlmError::Unreachable(self.host.clone()));
        }
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "temperature": self.temperature,
            "stream": false,
        });

        let mut last_err = None;
        for attempt in 1..=self.retries {
            match self.post_once(&payload).await {
                Ok(data) => {
                    let text = data["response"]
                        .as_str()
                        .ok_or_else(|| LlmError::EmptyResponse(data.to_string()))?;
                    debug!(model = %self.model, chars = text.len(), "ollama responded");
                    return Ok(text.to_string());
                }
                Err(e) => {
                    warn!(attempt, retries = self.retries, error = %e, "ollama POST failed");
                    last_err = Some(e);
                    if attempt < self.retries {
                        tokio::time::sleep(self.backoff * attempt).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| LlmError::Unreachable(self.host.clone())))
    }

    fn describe(&self) -> String {
        format!("ollama ({})", self.model)
    }
}

/// OpenAI-compatible chat completions.
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            base_url: OPENAI_BASE.to_string(),
            model: model.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.model,
                "messages": [{"role": "user", "content": prompt}],
                "temperature": 0.2,
            }))
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("Unknown API error")
                .to_string();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LlmError::EmptyResponse(body.to_string()))
    }

    fn describe(&self) -> String {
        format!("openai ({})", self.model)
    }
}

/// Build the generator selected by the settings.
pub fn build_generator(settings: &LlmSettings) -> Result<Box<dyn TextGenerator>, LlmError> {
    let generator: Box<dyn TextGenerator> = match settings.provider {
        LlmProvider::Ollama => Box::new(OllamaClient::new(&settings.ollama_host, &settings.model)?),
        LlmProvider::OpenAi => {
            let key = settings
                .openai_api_key
                .as_deref()
                .ok_or(LlmError::MissingKey("OPENAI_API_KEY"))?;
            Box::new(OpenAiClient::new(key, &settings.model))
        }
    };
    info!(generator = %generator.describe(), "text generator ready");
    Ok(generator)
}
