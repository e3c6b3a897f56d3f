//! Generator configuration
//!
//! A JSON file (every field optional) overlaid with environment variables.
//! The translator endpoint is resolved last, from the merged settings plus
//! the provider key variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::ai::OpenAiClient;
use crate::emit::BoardConfig;
use crate::placement::PlacementConfig;
use crate::repair::DEFAULT_RETRY_BUDGET;

pub const AUTO_MODEL: &str = "auto";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const LOCAL_BASE_URL: &str = "http://localhost:11434/v1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid value for {name}: '{value}'")]
    InvalidEnv { name: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// A concrete model name, or `auto` to pick from the available keys.
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: AUTO_MODEL.to_string(),
            temperature: 0.2,
            timeout_secs: 120,
        }
    }
}

/// Concrete endpoint after provider resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLlm {
    pub api_key: Option<String>,
    /// `None` means the OpenAI default.
    pub base_url: Option<String>,
    pub model: String,
}

impl LlmSettings {
    pub fn is_auto(&self) -> bool {
        self.model.trim().is_empty() || self.model.eq_ignore_ascii_case(AUTO_MODEL)
    }

    /// Resolve against the process environment.
    pub fn resolve(&self) -> ResolvedLlm {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// `auto` prefers OpenAI, then OpenRouter, then a local server. A model
    /// name with a `/` and no base URL is an OpenRouter model.
    pub fn resolve_with(&self, env: impl Fn(&str) -> Option<String>) -> ResolvedLlm {
        let env = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        if self.is_auto() {
            if let Some(key) = env("OPENAI_API_KEY") {
                return ResolvedLlm {
                    api_key: Some(key),
                    base_url: None,
                    model: "gpt-4o".to_string(),
                };
            }
            if let Some(key) = env("OPENROUTER_API_KEY") {
                return ResolvedLlm {
                    api_key: Some(key),
                    base_url: Some(OPENROUTER_BASE_URL.to_string()),
                    model: "openrouter/auto".to_string(),
                };
            }
            return ResolvedLlm {
                api_key: None,
                base_url: Some(
                    self.base_url
                        .clone()
                        .unwrap_or_else(|| LOCAL_BASE_URL.to_string()),
                ),
                model: "llama3".to_string(),
            };
        }

        if self.base_url.is_none() && self.model.contains('/') {
            return ResolvedLlm {
                api_key: self
                    .api_key
                    .clone()
                    .or_else(|| env("OPENROUTER_API_KEY")),
                base_url: Some(OPENROUTER_BASE_URL.to_string()),
                model: self.model.clone(),
            };
        }

        ResolvedLlm {
            api_key: self.api_key.clone().or_else(|| env("OPENAI_API_KEY")),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
        }
    }

    pub fn client(&self) -> OpenAiClient {
        let resolved = self.resolve();
        OpenAiClient::new(resolved.api_key, resolved.base_url, resolved.model)
            .with_temperature(self.temperature)
            .with_timeout(Duration::from_secs(self.timeout_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub llm: LlmSettings,
    pub placement: PlacementConfig,
    pub board: BoardConfig,
    /// Extra repair rounds after the first draft.
    pub retry_budget: usize,
    pub library_root: Option<PathBuf>,
    pub catalog_snapshot: Option<PathBuf>,
    pub output_dir: PathBuf,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            llm: LlmSettings::default(),
            placement: PlacementConfig::default(),
            board: BoardConfig::default(),
            retry_budget: DEFAULT_RETRY_BUDGET,
            library_root: None,
            catalog_snapshot: None,
            output_dir: PathBuf::from("."),
        }
    }
}

impl GeneratorConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// File (when given) then environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_file(path)?,
            None => Self::default(),
        };
        config.apply_env_with(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Overlay `LLM_API_KEY`, `LLM_BASE_URL`, `LLM_MODEL`, `NETFORGE_LIBS`,
    /// `NETFORGE_SNAPSHOT`, `NETFORGE_OUTPUT_DIR`, `NETFORGE_RETRIES` and
    /// `NETFORGE_SEED`. Unset or empty variables leave the value alone.
    pub fn apply_env_with(
        &mut self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let env = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = env("LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = env("LLM_BASE_URL") {
            self.llm.base_url = Some(url);
        }
        if let Some(model) = env("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(root) = env("NETFORGE_LIBS") {
            self.library_root = Some(PathBuf::from(root));
        }
        if let Some(snapshot) = env("NETFORGE_SNAPSHOT") {
            self.catalog_snapshot = Some(PathBuf::from(snapshot));
        }
        if let Some(dir) = env("NETFORGE_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(value) = env("NETFORGE_RETRIES") {
            self.retry_budget = parse_env("NETFORGE_RETRIES", &value)?;
        }
        if let Some(value) = env("NETFORGE_SEED") {
            self.placement.seed = Some(parse_env("NETFORGE_SEED", &value)?);
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    })
}
