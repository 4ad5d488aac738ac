use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

const ENV_CONFIG_PATH: &str = "TRIAGE_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

const ENV_OLLAMA_BASE_URL: &str = "OLLAMA_BASE_URL";
const ENV_MODEL: &str = "TRIAGE_MODEL";
const ENV_KEV_FEED_URL: &str = "KEV_FEED_URL";
const ENV_EPSS_BASE_URL: &str = "EPSS_BASE_URL";
const ENV_NVD_BASE_URL: &str = "NVD_BASE_URL";
const ENV_REDHAT_BASE_URL: &str = "REDHAT_BASE_URL";
const ENV_GITHUB_API_BASE_URL: &str = "GITHUB_API_BASE_URL";
const ENV_GITHUB_TOKEN: &str = "GITHUB_TOKEN";
const ENV_NVD_API_KEY: &str = "NVD_API_KEY";

pub const DEFAULT_MODEL: &str = "mistral:7b";
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

const DEFAULT_KEV_FEED_URL: &str =
    "https://www.cisa.gov/sites/default/files/feeds/known_exploited_vulnerabilities.json";
const DEFAULT_EPSS_BASE_URL: &str = "https://api.first.org/data/v1";
const DEFAULT_NVD_BASE_URL: &str = "https://services.nvd.nist.gov/rest/json/cves/2.0";
const DEFAULT_REDHAT_BASE_URL: &str = "https://access.redhat.com/hydra/rest/securitydata";
const DEFAULT_GITHUB_API_BASE_URL: &str = "https://api.github.com";

/// Upstream data source configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kev_feed_url: String,
    pub epss_base_url: String,
    pub nvd_base_url: String,
    pub redhat_base_url: String,
    pub github_api_base_url: String,
    /// Per-request timeout for every data source
    pub timeout_secs: u64,
    /// Commits requested from the GitHub search API
    pub max_patch_candidates: usize,
    /// Never read from the config file, only from the environment
    #[serde(skip)]
    pub github_token: Option<String>,
    #[serde(skip)]
    pub nvd_api_key: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kev_feed_url: DEFAULT_KEV_FEED_URL.to_string(),
            epss_base_url: DEFAULT_EPSS_BASE_URL.to_string(),
            nvd_base_url: DEFAULT_NVD_BASE_URL.to_string(),
            redhat_base_url: DEFAULT_REDHAT_BASE_URL.to_string(),
            github_api_base_url: DEFAULT_GITHUB_API_BASE_URL.to_string(),
            timeout_secs: 15,
            max_patch_candidates: 10,
            github_token: None,
            nvd_api_key: None,
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Local model runtime configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub name: String,
    pub temperature: f32,
    /// Fixed seed for the triage prompt so generation is reproducible
    pub seed: u64,
    pub prompt_timeout_secs: u64,
    pub indicator_timeout_secs: u64,
    /// Indicator questions asked after each structurally valid reply
    pub indicator_questions: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_BASE_URL.to_string(),
            name: DEFAULT_MODEL.to_string(),
            temperature: 0.1,
            seed: 42,
            prompt_timeout_secs: 300,
            indicator_timeout_secs: 60,
            indicator_questions: 2,
        }
    }
}

/// YAML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub sources: SourceConfig,
    #[serde(default)]
    pub model: ModelConfig,
}

/// Application configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub sources: SourceConfig,
    pub model: ModelConfig,
}

impl Config {
    /// Load configuration from the config file, then apply environment overrides
    pub fn from_env() -> Self {
        let config_path =
            std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let file = Self::load_config_file(&config_path).unwrap_or_default();

        let mut config = Self {
            sources: file.sources,
            model: file.model,
        };
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Apply overrides from a key lookup (the process environment in production)
    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |target: &mut String, key: &str| {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *target = value;
            }
        };

        set(&mut self.model.base_url, ENV_OLLAMA_BASE_URL);
        set(&mut self.model.name, ENV_MODEL);
        set(&mut self.sources.kev_feed_url, ENV_KEV_FEED_URL);
        set(&mut self.sources.epss_base_url, ENV_EPSS_BASE_URL);
        set(&mut self.sources.nvd_base_url, ENV_NVD_BASE_URL);
        set(&mut self.sources.redhat_base_url, ENV_REDHAT_BASE_URL);
        set(&mut self.sources.github_api_base_url, ENV_GITHUB_API_BASE_URL);

        self.sources.github_token = lookup(ENV_GITHUB_TOKEN).filter(|v| !v.trim().is_empty());
        self.sources.nvd_api_key = lookup(ENV_NVD_API_KEY).filter(|v| !v.trim().is_empty());
    }

    /// Load configuration from YAML file
    fn load_config_file(path: &str) -> Option<ConfigFile> {
        let path = Path::new(path);

        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return None;
        }

        match fs::read_to_string(path) {
            Ok(contents) => Self::parse_config(path, &contents),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read config file, using defaults");
                None
            }
        }
    }

    fn parse_config(path: &Path, contents: &str) -> Option<ConfigFile> {
        let contents = contents.trim();
        if contents.is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Some(ConfigFile::default());
        }

        match serde_yaml::from_str(contents) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "Loaded configuration from file");
                Some(config)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to parse config file, using defaults");
                None
            }
        }
    }
}
