//! Configuration system for Sitescope.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/sitescope/config.toml` and/or
//! `.sitescope/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::risk::RiskCategory;
use crate::types::{DEFAULT_BREADTH, DEFAULT_DEPTH};

/// Environment variable conventionally holding the Azure OpenAI endpoint.
pub const AZURE_ENDPOINT_ENV: &str = "AZURE_OPENAI_ENDPOINT";
/// Environment variable conventionally holding the Azure OpenAI deployment name.
pub const AZURE_DEPLOYMENT_ENV: &str = "AZURE_OPENAI_DEPLOYMENT_NAME";

/// Top-level configuration for Sitescope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub research: ResearchConfig,
    pub risk: RiskConfig,
    pub output: OutputConfig,
}

/// Completion service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "azure" or "openai" (any OpenAI-compatible endpoint).
    pub provider: String,
    /// Deployment name (Azure) or model identifier (OpenAI-compatible).
    pub model: String,
    /// Endpoint URL. Required for Azure; defaults to the OpenAI API otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Azure REST API version.
    pub api_version: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Inline API key. Takes precedence over `api_key_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to generate per call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    /// Retry policy for failed service calls.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "azure".to_string(),
            model: String::new(),
            endpoint: None,
            api_version: "2024-02-01".to_string(),
            api_key_env: "AZURE_OPENAI_API_KEY".to_string(),
            api_key: None,
            temperature: 0.7,
            max_tokens: None,
            timeout_secs: 120,
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Fill `endpoint` and `model` from the conventional Azure variables when unset.
    pub fn apply_env_fallbacks(&mut self) {
        self.apply_env_fallbacks_from(|key| std::env::var(key).ok());
    }

    /// Like [`apply_env_fallbacks`](Self::apply_env_fallbacks) with an injectable lookup.
    pub fn apply_env_fallbacks_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.endpoint.as_deref().is_none_or(str::is_empty) {
            self.endpoint = lookup(AZURE_ENDPOINT_ENV).filter(|v| !v.trim().is_empty());
        }
        if self.model.trim().is_empty()
            && let Some(deployment) = lookup(AZURE_DEPLOYMENT_ENV)
        {
            self.model = deployment.trim().to_string();
        }
    }

    /// Resolve the API key: inline value first, then the configured env var.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        self.resolve_api_key_from(|key| std::env::var(key).ok())
    }

    /// Like [`resolve_api_key`](Self::resolve_api_key) with an injectable lookup.
    pub fn resolve_api_key_from<F>(&self, lookup: F) -> Result<String, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            return Ok(key.clone());
        }
        lookup(&self.api_key_env)
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::EnvVarMissing {
                var: self.api_key_env.clone(),
            })
    }

    /// The effective endpoint, applying the OpenAI default where allowed.
    pub fn effective_endpoint(&self) -> Option<String> {
        match (&self.endpoint, self.provider.as_str()) {
            (Some(url), _) if !url.trim().is_empty() => {
                Some(url.trim().trim_end_matches('/').to_string())
            }
            (_, "openai") => Some("https://api.openai.com/v1".to_string()),
            _ => None,
        }
    }
}

/// Exponential backoff policy for failed completion calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Add up to 25% jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 32_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Research stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Aspects researched when the caller does not specify breadth.
    pub default_breadth: u8,
    /// Refinement iterations per aspect when the caller does not specify depth.
    pub default_depth: u8,
    /// Upper bound on aspect chains running at the same time.
    pub max_parallel_aspects: usize,
    /// Run one extra completion to produce an executive summary.
    pub executive_summary: bool,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            default_breadth: DEFAULT_BREADTH,
            default_depth: DEFAULT_DEPTH,
            max_parallel_aspects: 4,
            executive_summary: false,
        }
    }
}

/// Risk stage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Categories to emphasise. All six are always reported.
    #[serde(default)]
    pub focus: Vec<RiskCategory>,
}

/// Report output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory that receives report files.
    pub directory: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("reports"),
        }
    }
}

impl AppConfig {
    /// Check that everything needed to reach the completion service is present.
    ///
    /// Called once at startup; a failure here is fatal before any pipeline runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_with(|key| std::env::var(key).ok())
    }

    /// Like [`validate`](Self::validate) with an injectable environment lookup.
    pub fn validate_with<F>(&self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        match self.llm.provider.as_str() {
            "azure" | "openai" => {}
            other => {
                return Err(ConfigError::Invalid {
                    message: format!("unknown provider '{other}' (expected 'azure' or 'openai')"),
                });
            }
        }
        if self.llm.effective_endpoint().is_none() {
            return Err(ConfigError::MissingField {
                field: "llm.endpoint".to_string(),
            });
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "llm.model".to_string(),
            });
        }
        if self.llm.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                message: "llm.timeout_secs must be greater than zero".to_string(),
            });
        }
        if self.research.max_parallel_aspects == 0 {
            return Err(ConfigError::Invalid {
                message: "research.max_parallel_aspects must be greater than zero".to_string(),
            });
        }
        self.llm.resolve_api_key_from(lookup)?;
        Ok(())
    }

    /// A copy safe to print: inline credentials are masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.llm.api_key.is_some() {
            copy.llm.api_key = Some("********".to_string());
        }
        copy
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `SITESCOPE_`)
/// 3. Workspace-local config (`.sitescope/config.toml`)
/// 4. User config (`~/.config/sitescope/config.toml`)
/// 5. Built-in defaults
///
/// After extraction, unset endpoint/model fall back to the conventional
/// `AZURE_OPENAI_ENDPOINT` / `AZURE_OPENAI_DEPLOYMENT_NAME` variables.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&AppConfig>,
) -> Result<AppConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".sitescope").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // SITESCOPE_LLM__MODEL, SITESCOPE_RESEARCH__DEFAULT_DEPTH, etc.
    figment = figment.merge(Env::prefixed("SITESCOPE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let mut config: AppConfig = figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;
    config.llm.apply_env_fallbacks();
    Ok(config)
}

/// Path of the user-level config file, if a home directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "sitescope", "sitescope")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Check whether any Sitescope configuration file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if user_config_path().is_some_and(|p| p.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| ws.join(".sitescope").join("config.toml").exists())
}
