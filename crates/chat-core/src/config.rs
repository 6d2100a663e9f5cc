use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
const DEFAULT_CONTEXT_LENGTH: u32 = 32_768;
const DEFAULT_TEMPERATURE: f32 = 0.7;
const CONFIG_FILE_PATH: &str = "config.toml";

/// An OpenAI-compatible endpoint plus what the model behind it can do.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "generate_id")]
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    pub base_url: String,
    pub model_name: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub supports_vision: bool,
    #[serde(default)]
    pub supports_thinking: bool,
    /// Total token budget, response reserve included.
    #[serde(default = "default_context_length")]
    pub context_length: u32,
}

fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_context_length() -> u32 {
    DEFAULT_CONTEXT_LENGTH
}

impl ModelConfig {
    pub fn new(base_url: impl Into<String>, model_name: impl Into<String>) -> Self {
        let model_name = model_name.into();
        Self {
            id: generate_id(),
            display_name: model_name.clone(),
            base_url: base_url.into(),
            model_name,
            api_key: None,
            is_default: false,
            supports_vision: false,
            supports_thinking: false,
            context_length: DEFAULT_CONTEXT_LENGTH,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_context_length(mut self, context_length: u32) -> Self {
        self.context_length = context_length;
        self
    }

    pub fn with_thinking(mut self, supports_thinking: bool) -> Self {
        self.supports_thinking = supports_thinking;
        self
    }

    pub fn with_vision(mut self, supports_vision: bool) -> Self {
        self.supports_vision = supports_vision;
        self
    }
}

/// Per-request sampling parameters. `None` means the field is left out of the request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SamplingParams {
    #[serde(default = "default_temperature")]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub min_p: Option<f32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub repetition_penalty: Option<f32>,
}

fn default_temperature() -> Option<f32> {
    Some(DEFAULT_TEMPERATURE)
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: None,
            top_k: None,
            min_p: None,
            presence_penalty: None,
            frequency_penalty: None,
            repetition_penalty: None,
        }
    }
}

impl SamplingParams {
    /// All parameters left to the server.
    pub fn disabled() -> Self {
        Self {
            temperature: None,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationSettings {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub thinking_enabled: bool,
    #[serde(default)]
    pub sampling: SamplingParams,
    #[serde(default = "default_response_reserve")]
    pub response_reserve: u32,
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_response_reserve() -> u32 {
    crate::budget::DEFAULT_RESPONSE_RESERVE
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            thinking_enabled: false,
            sampling: SamplingParams::default(),
            response_reserve: default_response_reserve(),
        }
    }
}

impl GenerationSettings {
    /// Whether reasoning is expected for `model` even without an opening tag.
    pub fn implicit_thinking(&self, model: &ModelConfig) -> bool {
        self.thinking_enabled && model.supports_thinking
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenizerConfig {
    /// Path to a `tokenizer.json` (Hugging Face format).
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Application configuration: known endpoints, generation settings and tokenizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub settings: GenerationSettings,
    #[serde(default)]
    pub tokenizer: TokenizerConfig,
}

pub fn convo_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".convo")
}

fn convo_config_json_path() -> PathBuf {
    convo_dir().join("config.json")
}

fn parse_bool_env(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

impl AppConfig {
    /// Load from `~/.convo/config.json`, else `./config.toml`, then apply env overrides.
    ///
    /// Unreadable files are skipped with a warning so a broken file never blocks startup.
    pub fn load() -> Self {
        let mut config = AppConfig::default();

        let json_path = convo_config_json_path();
        let toml_path = Path::new(CONFIG_FILE_PATH);
        let candidate = if json_path.exists() {
            Some(json_path)
        } else if toml_path.exists() {
            Some(toml_path.to_path_buf())
        } else {
            None
        };

        if let Some(path) = candidate {
            match Self::from_path(&path) {
                Ok(file_config) => config = file_config,
                Err(e) => log::warn!("Ignoring config {:?}: {}", path, e),
            }
        }

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Parse a JSON or TOML file, chosen by extension.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(toml::from_str(&content)?)
        }
    }

    /// Apply `API_KEY`, `API_BASE`, `MODEL`, `CONVO_CONTEXT_LENGTH` and
    /// `CONVO_THINKING` on top of the loaded file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_base = lookup("API_BASE");
        let model = lookup("MODEL");

        if self.models.is_empty() {
            if let (Some(base), Some(name)) = (api_base.as_ref(), model.as_ref()) {
                let mut config = ModelConfig::new(base.clone(), name.clone());
                config.is_default = true;
                self.models.push(config);
            }
        }

        if let Some(default_model) = self.default_model_mut() {
            if let Some(base) = api_base {
                default_model.base_url = base;
            }
            if let Some(name) = model {
                default_model.model_name = name;
            }
            if let Some(api_key) = lookup("API_KEY") {
                default_model.api_key = Some(api_key);
            }
            if let Some(length) = lookup("CONVO_CONTEXT_LENGTH") {
                match length.trim().parse::<u32>() {
                    Ok(value) => default_model.context_length = value,
                    Err(_) => log::warn!("Ignoring invalid CONVO_CONTEXT_LENGTH={}", length),
                }
            }
        }

        if let Some(thinking) = lookup("CONVO_THINKING") {
            self.settings.thinking_enabled = parse_bool_env(&thinking);
        }
    }

    /// The model flagged as default, else the first one.
    pub fn default_model(&self) -> Option<&ModelConfig> {
        self.models
            .iter()
            .find(|m| m.is_default)
            .or_else(|| self.models.first())
    }

    fn default_model_mut(&mut self) -> Option<&mut ModelConfig> {
        let index = self
            .models
            .iter()
            .position(|m| m.is_default)
            .or(if self.models.is_empty() { None } else { Some(0) })?;
        self.models.get_mut(index)
    }

    /// Look a model up by id, display name or model name.
    pub fn find_model(&self, key: &str) -> Option<&ModelConfig> {
        self.models
            .iter()
            .find(|m| m.id == key || m.display_name == key || m.model_name == key)
    }
}
