//! Application state and service initialization
//!
//! Builds the shared HTTP client and wires the collection, model and triage
//! services together for a single CLI run.

use std::sync::Arc;

use reqwest::Client;
use url::Url;

use crate::model::Config;
use crate::service::triage::PromptError;
use crate::service::{
    MistakeDetector, ModelClient, OllamaClient, TriageService, VulnerabilityService,
};

/// Application state containing all services
pub struct AppState {
    pub config: Config,
    /// Collects KEV, EPSS, NVD, Red Hat and GitHub data
    pub vulnerability_service: VulnerabilityService,
    /// Ollama client, also used for the startup preflight
    pub ollama: Arc<OllamaClient>,
    /// Attempt loop around the model
    pub triage_service: TriageService,
}

impl AppState {
    /// Initialize all services
    ///
    /// Fails only on configuration problems; upstream sources and the model
    /// runtime are not contacted here.
    pub fn new(config: Config) -> Result<Self, AppError> {
        if config.model.name.trim().is_empty() {
            return Err(AppError::MissingConfig("model name"));
        }

        Url::parse(&config.model.base_url)
            .map_err(|_| AppError::InvalidConfig("OLLAMA_BASE_URL is not a valid URL"))?;

        let http = Client::builder()
            .build()
            .map_err(|e| AppError::HttpClient(e.to_string()))?;

        let vulnerability_service = VulnerabilityService::new(http.clone(), &config.sources);

        let ollama = Arc::new(OllamaClient::new(http, &config.model.base_url));
        let model_client: Arc<dyn ModelClient> = ollama.clone();

        let detector = MistakeDetector::from_entropy(Arc::clone(&model_client), &config.model);
        let triage_service =
            TriageService::new(model_client, Box::new(detector), config.model.clone());

        Ok(Self {
            config,
            vulnerability_service,
            ollama,
            triage_service,
        })
    }

    /// Check the model runtime before triage; problems are only logged
    pub async fn preflight(&self) {
        let model = &self.config.model.name;

        match self.ollama.health(model).await {
            Ok(health) if health.model_available => {
                tracing::info!(version = %health.version, model = %model, "Model runtime ready");
            }
            Ok(health) => {
                tracing::warn!(
                    version = %health.version,
                    model = %model,
                    "Model is not pulled, run `ollama pull {}`",
                    model
                );
            }
            Err(e) => {
                tracing::warn!(
                    base_url = %self.config.model.base_url,
                    error = %e,
                    "Model runtime unreachable, is `ollama serve` running?"
                );
            }
        }
    }
}

/// Application-level errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AppError {
    /// HTTP client could not be built
    #[error("HTTP client initialization failed: {0}")]
    HttpClient(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingConfig(&'static str),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error(transparent)]
    Prompt(#[from] PromptError),
}
