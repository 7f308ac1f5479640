pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;

use self::validation::validate_config;

/// Environment variable holding the upstream credential.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
/// Environment variable overriding the upstream base URL.
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// Seconds to wait for upstream response headers.
    pub timeout: u64,
    /// Seconds without an upstream chunk before the relay gives up; 0 disables.
    pub idle_timeout_secs: u64,
    pub http_pool_max_idle_per_host: usize,
    pub http_pool_idle_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
    pub base_path: String,
    pub http_use_env_proxy: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            host: "0.0.0.0".to_string(),
            timeout: 180,
            idle_timeout_secs: 120,
            http_pool_max_idle_per_host: 16,
            http_pool_idle_timeout_secs: 15,
            runtime_worker_threads: None,
            base_path: String::new(),
            http_use_env_proxy: false,
        }
    }
}

/// Completion upstream: endpoint, credential and sampling parameters.
///
/// `stream` and `n` are not configurable; the relay always requests a single
/// streamed choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "text-davinci-003".to_string(),
            temperature: 0.7,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            max_tokens: 2048,
            proxy: None,
        }
    }
}

impl UpstreamConfig {
    /// The credential, or `None` when it is absent or blank.
    #[must_use]
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    /// Full URL of the legacy completions endpoint.
    #[must_use]
    pub fn completions_url(&self) -> String {
        format!("{}/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Which leading-artifact filter the stream transform applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FilterStrategy {
    #[default]
    LeadingNewline,
    None,
}

/// How the leading-newline filter decides that a delta is an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NewlineMatch {
    /// Any newline anywhere in the delta.
    #[default]
    Contains,
    /// The delta is made of line breaks only.
    Only,
}

impl fmt::Display for FilterStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterStrategy::LeadingNewline => write!(f, "leading_newline"),
            FilterStrategy::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactFilterConfig {
    pub strategy: FilterStrategy,
    pub lookback: usize,
    pub match_mode: NewlineMatch,
}

impl Default for ArtifactFilterConfig {
    fn default() -> Self {
        Self {
            strategy: FilterStrategy::LeadingNewline,
            lookback: 2,
            match_mode: NewlineMatch::Contains,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub artifact_filter: ArtifactFilterConfig,
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    pub log_level: String,
    pub log_json: bool,
    /// Overrides the built-in prompt; must contain `{fact}` and `{appeal}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    pub missing_key_message: String,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            log_json: false,
            prompt_template: None,
            missing_key_message: format!("请设置 {API_KEY_ENV}"),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub relay: RelayConfig,
    pub features: FeaturesConfig,
}

impl AppConfig {
    /// Apply overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(key) = lookup(API_KEY_ENV) {
            self.upstream.api_key = Some(key);
        }
        if let Some(url) = lookup(BASE_URL_ENV).filter(|url| !url.trim().is_empty()) {
            self.upstream.base_url = url;
        }
        self
    }
}

/// Load configuration from a YAML file, apply env overrides and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_yaml::from_str(&contents)?;
    let config = config.with_env_overrides();
    validate_config(&config)?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields defaults plus env overrides.
///
/// # Errors
///
/// Same as [`load_config`], except that a missing file is not an error.
pub fn load_config_or_default(path: &str) -> Result<AppConfig, ConfigError> {
    match load_config(path) {
        Err(ConfigError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            let config = AppConfig::default().with_env_overrides();
            validate_config(&config)?;
            Ok(config)
        }
        other => other,
    }
}
