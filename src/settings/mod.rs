//! Settings Module
//!
//! Admin-managed runtime settings: the active AI provider, per-provider
//! credentials and models, generation parameters, deny words and the table of
//! local models that cannot bind tools. API keys are encrypted at rest using
//! AES-256-GCM.

pub mod routes;
pub mod storage;

pub use routes::router;
pub use storage::{SettingsHandle, SettingsStorage};

use serde::{Deserialize, Serialize};

use crate::llm::selector::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use crate::llm::{AvailableProviders, ProviderKind};
use crate::types::{AppError, AppResult};

pub const MIN_MAX_TOKENS: u32 = 100;
pub const MAX_MAX_TOKENS: u32 = 4000;

/// Credential, model and endpoint for one provider
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProviderSettings {
    /// The API key (encrypted at rest, decrypted when loaded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppSettings {
    /// Overrides `AI_PROVIDER` when set
    #[serde(default)]
    pub ai_provider: Option<ProviderKind>,

    #[serde(default)]
    pub openai: ProviderSettings,

    #[serde(default)]
    pub gemini: ProviderSettings,

    #[serde(default)]
    pub ollama: ProviderSettings,

    /// Messages containing any of these (case-insensitive) are rejected
    #[serde(default)]
    pub deny_words: Vec<String>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Replaces `OLLAMA_TOOLLESS_MODELS` when set
    #[serde(default)]
    pub tool_less_models: Option<Vec<String>>,
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            ai_provider: None,
            openai: ProviderSettings::default(),
            gemini: ProviderSettings::default(),
            ollama: ProviderSettings::default(),
            deny_words: Vec::new(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            tool_less_models: None,
        }
    }
}

impl AppSettings {
    pub fn validate(&self) -> AppResult<()> {
        if !(MIN_MAX_TOKENS..=MAX_MAX_TOKENS).contains(&self.max_tokens) {
            return Err(AppError::InvalidRequest(format!(
                "max_tokens must be between {} and {}",
                MIN_MAX_TOKENS, MAX_MAX_TOKENS
            )));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(AppError::InvalidRequest(
                "temperature must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }

    /// First deny word contained in `message`, compared case-insensitively
    pub fn denied_word(&self, message: &str) -> Option<&str> {
        let lowered = message.to_lowercase();
        self.deny_words
            .iter()
            .map(|w| w.trim())
            .find(|w| !w.is_empty() && lowered.contains(&w.to_lowercase()))
    }

    /// Apply a partial update; empty key strings clear the stored key
    pub fn apply(&mut self, update: UpdateSettingsRequest) -> AppResult<()> {
        if let Some(provider) = update.ai_provider {
            self.ai_provider = Some(provider);
        }

        apply_provider(&mut self.openai, update.openai_key, update.openai_model, update.openai_base_url);
        apply_provider(&mut self.gemini, update.gemini_key, update.gemini_model, update.gemini_base_url);
        apply_provider(&mut self.ollama, None, update.ollama_model, update.ollama_base_url);

        if let Some(words) = update.deny_words {
            self.deny_words = words
                .into_iter()
                .map(|w| w.trim().to_string())
                .filter(|w| !w.is_empty())
                .collect();
        }
        if let Some(max_tokens) = update.max_tokens {
            self.max_tokens = max_tokens;
        }
        if let Some(temperature) = update.temperature {
            self.temperature = temperature;
        }
        if let Some(models) = update.tool_less_models {
            self.tool_less_models = Some(models);
        }

        self.validate()
    }
}

fn apply_provider(
    config: &mut ProviderSettings,
    key: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
) {
    let normalize = |value: String| {
        let value = value.trim().to_string();
        (!value.is_empty()).then_some(value)
    };
    if let Some(key) = key {
        config.api_key = normalize(key);
    }
    if let Some(model) = model {
        config.model = normalize(model);
    }
    if let Some(url) = base_url {
        config.base_url = normalize(url);
    }
}

/// Settings response for the admin panel (masks API keys)
#[derive(Debug, Clone, Serialize)]
pub struct SettingsResponse {
    pub ai_provider: Option<ProviderKind>,
    pub openai: ProviderStatus,
    pub gemini: ProviderStatus,
    pub ollama: ProviderStatus,
    pub deny_words: Vec<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub tool_less_models: Option<Vec<String>>,
}

/// Provider status for display (masks actual key)
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub has_key: bool,
    /// Last 4 chars only
    pub key_hint: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

impl From<&ProviderSettings> for ProviderStatus {
    fn from(config: &ProviderSettings) -> Self {
        let (has_key, key_hint) = match &config.api_key {
            Some(key) if key.chars().count() > 4 => {
                let tail: String = key.chars().skip(key.chars().count() - 4).collect();
                (true, Some(format!("••••{}", tail)))
            }
            Some(_) => (true, Some("••••".to_string())),
            None => (false, None),
        };

        Self {
            has_key,
            key_hint,
            model: config.model.clone(),
            base_url: config.base_url.clone(),
        }
    }
}

impl From<&AppSettings> for SettingsResponse {
    fn from(settings: &AppSettings) -> Self {
        Self {
            ai_provider: settings.ai_provider,
            openai: ProviderStatus::from(&settings.openai),
            gemini: ProviderStatus::from(&settings.gemini),
            ollama: ProviderStatus::from(&settings.ollama),
            deny_words: settings.deny_words.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            tool_less_models: settings.tool_less_models.clone(),
        }
    }
}

/// Request to update settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSettingsRequest {
    #[serde(default)]
    pub ai_provider: Option<ProviderKind>,

    #[serde(default)]
    pub openai_key: Option<String>,
    #[serde(default)]
    pub openai_model: Option<String>,
    #[serde(default)]
    pub openai_base_url: Option<String>,

    #[serde(default)]
    pub gemini_key: Option<String>,
    #[serde(default)]
    pub gemini_model: Option<String>,
    #[serde(default)]
    pub gemini_base_url: Option<String>,

    #[serde(default)]
    pub ollama_model: Option<String>,
    #[serde(default)]
    pub ollama_base_url: Option<String>,

    #[serde(default)]
    pub deny_words: Option<Vec<String>>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub tool_less_models: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSelectionRequest {
    pub ai_provider: ProviderKind,
}

/// Active provider plus which providers can currently be used
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSelectionResponse {
    pub ai_provider: ProviderKind,
    pub available_providers: AvailableProviders,
}
