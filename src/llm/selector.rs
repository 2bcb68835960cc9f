//! Provider selection
//!
//! Every request resolves its own immutable [`ProviderSnapshot`] from three
//! layers, later layers winning:
//!
//! ```text
//! environment (operator)  ->  persisted AppSettings (admin)  ->  request headers (user)
//! ```
//!
//! [`ProviderSelector::select`] turns the snapshot into a ready [`ChatModel`].

use axum::{extract::FromRequestParts, http::request::Parts, http::HeaderMap};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::google::GoogleAdapter;
use super::ollama::OllamaAdapter;
use super::openai::OpenAIAdapter;
use super::provider::{HttpOptions, LLMAdapter};
use crate::config::LLMConfig;
use crate::settings::AppSettings;
use crate::types::{AppError, AppResult, LLMMessage, LLMRequest, ToolDefinition};

pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_MAX_TOKENS: u32 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Gemini,
    Ollama,
    Auto,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OpenAI => write!(f, "openai"),
            ProviderKind::Gemini => write!(f, "gemini"),
            ProviderKind::Ollama => write!(f, "ollama"),
            ProviderKind::Auto => write!(f, "auto"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAI),
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            "ollama" => Ok(ProviderKind::Ollama),
            "auto" => Ok(ProviderKind::Auto),
            other => Err(format!(
                "Unknown AI provider '{}'. Expected one of: openai, gemini, ollama, auto",
                other
            )),
        }
    }
}

/// Model-name fragments of local models that cannot bind tools
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCapabilities {
    pub toolless_patterns: Vec<String>,
}

impl ToolCapabilities {
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            toolless_patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn supports_tools(&self, provider: ProviderKind, model: &str) -> bool {
        match provider {
            ProviderKind::OpenAI | ProviderKind::Gemini | ProviderKind::Auto => true,
            ProviderKind::Ollama => {
                let model = model.to_lowercase();
                !self
                    .toolless_patterns
                    .iter()
                    .filter(|p| !p.trim().is_empty())
                    .any(|p| model.contains(&p.trim().to_lowercase()))
            }
        }
    }
}

/// Request-scoped credential, model and endpoint overrides
#[derive(Debug, Clone, Default)]
pub struct ProviderOverrides {
    pub openai_key: Option<String>,
    pub openai_model: Option<String>,
    pub gemini_key: Option<String>,
    pub gemini_model: Option<String>,
    pub ollama_url: Option<String>,
    pub ollama_model: Option<String>,
}

impl ProviderOverrides {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            openai_key: get("x-openai-key"),
            openai_model: get("x-openai-model"),
            gemini_key: get("x-gemini-key"),
            gemini_model: get("x-gemini-model"),
            ollama_url: get("x-ollama-url"),
            ollama_model: get("x-ollama-model"),
        }
    }
}

impl<S> FromRequestParts<S> for ProviderOverrides
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

#[derive(Debug, Clone)]
pub struct RemoteProvider {
    /// Key from the environment or admin settings
    pub operator_key: Option<String>,
    /// Key supplied with the request
    pub user_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

impl RemoteProvider {
    pub fn key(&self) -> Option<&str> {
        self.operator_key.as_deref().or(self.user_key.as_deref())
    }

    pub fn has_credential(&self) -> bool {
        self.key().is_some()
    }
}

#[derive(Debug, Clone)]
pub struct LocalProvider {
    pub base_url: String,
    pub model: String,
}

/// Everything needed to build a model client for one request
#[derive(Debug, Clone)]
pub struct ProviderSnapshot {
    pub provider: ProviderKind,
    pub openai: RemoteProvider,
    pub gemini: RemoteProvider,
    pub ollama: LocalProvider,
    pub capabilities: ToolCapabilities,
    pub temperature: f32,
    pub max_tokens: u32,
    pub http: HttpOptions,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AvailableProviders {
    pub openai: bool,
    pub gemini: bool,
    pub ollama: bool,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn env_value(value: &str) -> Option<String> {
    non_empty(&Some(value.to_string()))
}

impl ProviderSnapshot {
    pub fn from_sources(
        config: &LLMConfig,
        settings: &AppSettings,
        overrides: &ProviderOverrides,
        http: &HttpOptions,
    ) -> Self {
        let openai = RemoteProvider {
            operator_key: non_empty(&settings.openai.api_key).or_else(|| env_value(&config.openai_api_key)),
            user_key: non_empty(&overrides.openai_key),
            model: non_empty(&overrides.openai_model)
                .or_else(|| non_empty(&settings.openai.model))
                .unwrap_or_else(|| config.openai_model.clone()),
            base_url: non_empty(&settings.openai.base_url)
                .unwrap_or_else(|| config.openai_base_url.clone()),
        };
        let gemini = RemoteProvider {
            operator_key: non_empty(&settings.gemini.api_key).or_else(|| env_value(&config.google_api_key)),
            user_key: non_empty(&overrides.gemini_key),
            model: non_empty(&overrides.gemini_model)
                .or_else(|| non_empty(&settings.gemini.model))
                .unwrap_or_else(|| config.gemini_model.clone()),
            base_url: non_empty(&settings.gemini.base_url)
                .unwrap_or_else(|| config.gemini_base_url.clone()),
        };
        let ollama = LocalProvider {
            base_url: non_empty(&overrides.ollama_url)
                .or_else(|| non_empty(&settings.ollama.base_url))
                .unwrap_or_else(|| config.ollama_base_url.clone()),
            model: non_empty(&overrides.ollama_model)
                .or_else(|| non_empty(&settings.ollama.model))
                .unwrap_or_else(|| config.ollama_model.clone()),
        };

        Self {
            provider: settings.ai_provider.unwrap_or(config.default_provider),
            openai,
            gemini,
            ollama,
            capabilities: ToolCapabilities::new(
                settings
                    .tool_less_models
                    .clone()
                    .unwrap_or_else(|| config.toolless_models.clone()),
            ),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            http: http.clone(),
        }
    }

    pub fn available_providers(&self) -> AvailableProviders {
        AvailableProviders {
            openai: self.openai.has_credential(),
            gemini: self.gemini.has_credential(),
            ollama: true,
        }
    }

    /// Tool support of the configured provider, before any fallback
    pub fn supports_tools(&self) -> bool {
        let model = match self.provider {
            ProviderKind::OpenAI => &self.openai.model,
            ProviderKind::Gemini => &self.gemini.model,
            ProviderKind::Ollama | ProviderKind::Auto => &self.ollama.model,
        };
        self.capabilities.supports_tools(self.provider, model)
    }
}

/// A resolved model client plus the generation parameters to call it with
#[derive(Clone)]
pub struct ChatModel {
    pub adapter: Arc<dyn LLMAdapter>,
    pub provider: ProviderKind,
    pub model: String,
    pub supports_tools: bool,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl std::fmt::Debug for ChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatModel")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("supports_tools", &self.supports_tools)
            .finish()
    }
}

impl ChatModel {
    pub fn new(adapter: Arc<dyn LLMAdapter>, provider: ProviderKind, model: impl Into<String>, supports_tools: bool) -> Self {
        Self {
            adapter,
            provider,
            model: model.into(),
            supports_tools,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Build a request; tools are only bound when the model supports them
    pub fn request(&self, system: &str, messages: Vec<LLMMessage>, tools: Vec<ToolDefinition>) -> LLMRequest {
        LLMRequest {
            model: self.model.clone(),
            messages,
            tools: if self.supports_tools { tools } else { Vec::new() },
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
            system_instruction: Some(system.to_string()),
        }
    }
}

pub struct ProviderSelector;

impl ProviderSelector {
    /// Resolve the snapshot's provider into a model client.
    ///
    /// An explicit remote provider without a credential is a configuration
    /// error. `auto` walks the configured remote credentials in priority order
    /// and ends at the local provider, which needs none.
    pub fn select(snapshot: &ProviderSnapshot) -> AppResult<ChatModel> {
        let model = match snapshot.provider {
            ProviderKind::OpenAI => {
                let key = snapshot.openai.key().ok_or_else(|| {
                    AppError::Configuration(
                        "OpenAI is selected but no OpenAI API key is configured".to_string(),
                    )
                })?;
                Self::build_openai(snapshot, key)?
            }
            ProviderKind::Gemini => {
                let key = snapshot.gemini.key().ok_or_else(|| {
                    AppError::Configuration(
                        "Gemini is selected but no Google API key is configured".to_string(),
                    )
                })?;
                Self::build_gemini(snapshot, key)?
            }
            ProviderKind::Ollama => Self::build_ollama(snapshot)?,
            ProviderKind::Auto => Self::select_auto(snapshot)?,
        };

        info!(
            provider = %model.provider,
            model = %model.model,
            supports_tools = model.supports_tools,
            "Selected chat model"
        );
        Ok(model)
    }

    fn select_auto(snapshot: &ProviderSnapshot) -> AppResult<ChatModel> {
        let candidates = [
            (ProviderKind::OpenAI, snapshot.openai.operator_key.as_deref()),
            (ProviderKind::Gemini, snapshot.gemini.operator_key.as_deref()),
            (ProviderKind::OpenAI, snapshot.openai.user_key.as_deref()),
            (ProviderKind::Gemini, snapshot.gemini.user_key.as_deref()),
        ];

        for (kind, key) in candidates {
            let Some(key) = key else { continue };
            let attempt = match kind {
                ProviderKind::OpenAI => Self::build_openai(snapshot, key),
                _ => Self::build_gemini(snapshot, key),
            };
            match attempt {
                Ok(model) => return Ok(model),
                Err(e) => warn!(provider = %kind, error = %e, "Auto provider candidate failed, trying next"),
            }
        }

        info!("No remote provider available, falling back to ollama");
        Self::build_ollama(snapshot)
    }

    fn finish(snapshot: &ProviderSnapshot, adapter: Arc<dyn LLMAdapter>, kind: ProviderKind, model: &str) -> ChatModel {
        ChatModel {
            adapter,
            provider: kind,
            model: model.to_string(),
            supports_tools: snapshot.capabilities.supports_tools(kind, model),
            temperature: snapshot.temperature,
            max_tokens: snapshot.max_tokens,
        }
    }

    fn build_openai(snapshot: &ProviderSnapshot, key: &str) -> AppResult<ChatModel> {
        let adapter = OpenAIAdapter::new(key, &snapshot.openai.base_url, &snapshot.http)?;
        Ok(Self::finish(snapshot, Arc::new(adapter), ProviderKind::OpenAI, &snapshot.openai.model))
    }

    fn build_gemini(snapshot: &ProviderSnapshot, key: &str) -> AppResult<ChatModel> {
        let adapter = GoogleAdapter::new(key, &snapshot.gemini.base_url, &snapshot.http)?;
        Ok(Self::finish(snapshot, Arc::new(adapter), ProviderKind::Gemini, &snapshot.gemini.model))
    }

    fn build_ollama(snapshot: &ProviderSnapshot) -> AppResult<ChatModel> {
        let adapter = OllamaAdapter::new(&snapshot.ollama.base_url, &snapshot.http);
        Ok(Self::finish(snapshot, Arc::new(adapter), ProviderKind::Ollama, &snapshot.ollama.model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_TOOLLESS_MODELS;

    fn llm_config(provider: ProviderKind) -> LLMConfig {
        LLMConfig {
            default_provider: provider,
            openai_api_key: String::new(),
            openai_model: "gpt-4".to_string(),
            openai_base_url: crate::llm::openai::OPENAI_API_BASE.to_string(),
            google_api_key: String::new(),
            gemini_model: "gemini-2.0-flash-exp".to_string(),
            gemini_base_url: crate::llm::google::GEMINI_API_BASE.to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            ollama_model: "gemma:7b".to_string(),
            toolless_models: DEFAULT_TOOLLESS_MODELS.iter().map(|s| s.to_string()).collect(),
            request_timeout_secs: 5,
            max_retries: 0,
        }
    }

    fn http(config: &LLMConfig) -> HttpOptions {
        HttpOptions::new(config.request_timeout(), config.max_retries).unwrap()
    }

    fn snapshot(config: &LLMConfig, overrides: &ProviderOverrides) -> ProviderSnapshot {
        ProviderSnapshot::from_sources(config, &AppSettings::default(), overrides, &http(config))
    }

    #[test]
    fn test_auto_without_keys_resolves_to_local() {
        let config = llm_config(ProviderKind::Auto);
        let model = ProviderSelector::select(&snapshot(&config, &ProviderOverrides::default())).unwrap();
        assert_eq!(model.provider, ProviderKind::Ollama);
        assert_eq!(model.model, "gemma:7b");
        // gemma is on the tool-less list, so auto re-checks the resolved provider
        assert!(!model.supports_tools);
    }

    #[test]
    fn test_explicit_provider_without_key_is_configuration_error() {
        let config = llm_config(ProviderKind::OpenAI);
        let err = ProviderSelector::select(&snapshot(&config, &ProviderOverrides::default())).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_user_key_enables_explicit_provider() {
        let config = llm_config(ProviderKind::Gemini);
        let overrides = ProviderOverrides {
            gemini_key: Some("user-key".to_string()),
            gemini_model: Some("gemini-1.5-pro".to_string()),
            ..Default::default()
        };
        let model = ProviderSelector::select(&snapshot(&config, &overrides)).unwrap();
        assert_eq!(model.provider, ProviderKind::Gemini);
        assert_eq!(model.model, "gemini-1.5-pro");
        assert!(model.supports_tools);
    }

    #[test]
    fn test_auto_prefers_operator_keys_over_user_keys() {
        let mut config = llm_config(ProviderKind::Auto);
        config.google_api_key = "operator-gemini".to_string();
        let overrides = ProviderOverrides {
            openai_key: Some("user-openai".to_string()),
            ..Default::default()
        };
        let model = ProviderSelector::select(&snapshot(&config, &overrides)).unwrap();
        assert_eq!(model.provider, ProviderKind::Gemini);
    }

    #[test]
    fn test_settings_override_environment() {
        let config = llm_config(ProviderKind::OpenAI);
        let mut settings = AppSettings::default();
        settings.ai_provider = Some(ProviderKind::Ollama);
        settings.ollama.model = Some("llama3.1:8b".to_string());
        let snap = ProviderSnapshot::from_sources(&config, &settings, &ProviderOverrides::default(), &http(&config));
        assert_eq!(snap.provider, ProviderKind::Ollama);
        assert_eq!(snap.ollama.model, "llama3.1:8b");
        assert!(snap.supports_tools());
    }

    #[test]
    fn test_available_providers() {
        let mut config = llm_config(ProviderKind::Auto);
        config.openai_api_key = "sk-operator".to_string();
        let available = snapshot(&config, &ProviderOverrides::default()).available_providers();
        assert_eq!(
            available,
            AvailableProviders { openai: true, gemini: false, ollama: true }
        );
    }

    #[test]
    fn test_capability_table_is_case_insensitive() {
        let caps = ToolCapabilities::new(["Phi", "tinyllama"]);
        assert!(!caps.supports_tools(ProviderKind::Ollama, "phi3:mini"));
        assert!(!caps.supports_tools(ProviderKind::Ollama, "TinyLlama"));
        assert!(caps.supports_tools(ProviderKind::Ollama, "qwen2.5:7b"));
        assert!(caps.supports_tools(ProviderKind::OpenAI, "phi-anything"));
    }

    #[test]
    fn test_overrides_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-openai-key", "sk-user".parse().unwrap());
        headers.insert("x-ollama-model", "  ".parse().unwrap());
        let overrides = ProviderOverrides::from_headers(&headers);
        assert_eq!(overrides.openai_key.as_deref(), Some("sk-user"));
        assert_eq!(overrides.ollama_model, None);
    }

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("Gemini".parse::<ProviderKind>().unwrap(), ProviderKind::Gemini);
        assert_eq!("google".parse::<ProviderKind>().unwrap(), ProviderKind::Gemini);
        assert!("anthropic".parse::<ProviderKind>().is_err());
    }
}
