//! Local LLM client and interaction utilities
//!
//! Talks to an Ollama runtime over its HTTP API. Callers depend on the
//! [`ModelClient`] trait so the triage loop can run against a stub.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::model::ModelConfig;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Cannot connect to model runtime at {0}")]
    Connection(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Model runtime returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse response: {0}")]
    Parse(String),
}

/// Per-call generation settings
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub model: String,
    pub temperature: f32,
    pub seed: Option<u64>,
    pub timeout: Duration,
}

impl GenerationOptions {
    /// Settings for the triage prompt: low temperature, fixed seed, long timeout
    pub fn triage(config: &ModelConfig) -> Self {
        Self {
            model: config.name.clone(),
            temperature: config.temperature,
            seed: Some(config.seed),
            timeout: Duration::from_secs(config.prompt_timeout_secs),
        }
    }

    /// Settings for indicator questions: no seed, shorter timeout
    pub fn indicator(config: &ModelConfig) -> Self {
        Self {
            model: config.name.clone(),
            temperature: config.temperature,
            seed: None,
            timeout: Duration::from_secs(config.indicator_timeout_secs),
        }
    }
}

/// A generative model that turns a prompt into text
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String, LlmError>;
}

/// Call the model and degrade any failure to an empty reply
pub async fn call_model(client: &dyn ModelClient, prompt: &str, options: &GenerationOptions) -> String {
    let start_time = Instant::now();

    match client.generate(prompt, options).await {
        Ok(text) => {
            tracing::debug!(
                model = %options.model,
                elapsed_ms = start_time.elapsed().as_millis(),
                prompt_length = prompt.len(),
                reply_length = text.len(),
                "Model call completed"
            );
            text
        }
        Err(e) => {
            tracing::error!(
                model = %options.model,
                elapsed_ms = start_time.elapsed().as_millis(),
                prompt_length = prompt.len(),
                error = %e,
                "Model call failed"
            );
            String::new()
        }
    }
}

/// Request body for Ollama /api/generate
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateRequestOptions,
}

#[derive(Debug, Serialize)]
struct GenerateRequestOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

/// Response body from Ollama /api/generate
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

/// Result of the startup preflight against the model runtime
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeHealth {
    pub version: String,
    pub model_available: bool,
}

/// Ollama HTTP client
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Check that the runtime answers and the model has been pulled
    pub async fn health(&self, model: &str) -> Result<RuntimeHealth, LlmError> {
        let timeout = Duration::from_secs(5);

        let version: VersionResponse = self
            .get_json(&format!("{}/api/version", self.base_url), timeout)
            .await?;

        let tags: TagsResponse = self
            .get_json(&format!("{}/api/tags", self.base_url), timeout)
            .await?;

        // Ollama reports untagged pulls as `name:latest`
        let wanted = if model.contains(':') {
            model.to_string()
        } else {
            format!("{}:latest", model)
        };

        Ok(RuntimeHealth {
            version: version.version,
            model_available: tags.models.iter().any(|m| m.name == wanted),
        })
    }

    async fn get_json<T>(&self, url: &str, timeout: Duration) -> Result<T, LlmError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))
    }

    fn map_transport_error(&self, e: reqwest::Error, timeout: Duration) -> LlmError {
        if e.is_connect() {
            LlmError::Connection(self.base_url.clone())
        } else if e.is_timeout() {
            LlmError::Timeout(timeout.as_secs())
        } else {
            LlmError::Http(e)
        }
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &options.model,
            prompt,
            stream: false,
            options: GenerateRequestOptions {
                temperature: options.temperature,
                seed: options.seed,
            },
        };

        tracing::debug!(
            model = %options.model,
            prompt_length = prompt.len(),
            timeout_secs = options.timeout.as_secs(),
            "Sending prompt to Ollama"
        );

        let response = self
            .client
            .post(&url)
            .json(&body)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e, options.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        Ok(parsed.response)
    }
}
