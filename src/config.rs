use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::agents::AnswerPolicy;
use crate::llm::ProviderKind;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub llm: LLMConfig,
    pub knowledge: KnowledgeConfig,
    pub agent: AgentConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
    pub settings_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors_allowed_origins: Vec<String>,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiry_days: i64,
    /// Email domains allowed to register; empty allows any domain
    pub allowed_domains: Vec<String>,
    /// Email domains whose users are granted admin rights
    pub admin_domains: Vec<String>,
}

/// Operator-configured provider credentials and defaults
#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    pub default_provider: ProviderKind,
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_base_url: String,
    pub google_api_key: String,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub ollama_base_url: String,
    pub ollama_model: String,
    /// Local model name fragments that cannot bind tools
    pub toolless_models: Vec<String>,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

impl LLMConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeConfig {
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub answer_policy: AnswerPolicy,
    pub max_iterations: usize,
    pub timeout_secs: u64,
    pub memory_enabled: bool,
    pub memory_max_messages: usize,
    pub memory_max_threads: usize,
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            answer_policy: AnswerPolicy::Strict,
            max_iterations: 5,
            timeout_secs: 120,
            memory_enabled: true,
            memory_max_messages: 200,
            memory_max_threads: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub chat_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub log_dir: Option<PathBuf>,
}

pub const DEFAULT_TOOLLESS_MODELS: &[&str] = &["gemma", "phi", "tinyllama", "orca-mini", "llama2"];

fn var_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_var<T>(key: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var_or(key, default)
        .parse()
        .with_context(|| format!("Invalid value for {}", key))
}

pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let default_provider: ProviderKind = var_or("AI_PROVIDER", "openai")
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
        let answer_policy: AnswerPolicy = var_or("AGENT_ANSWER_POLICY", "strict")
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;

        let settings_dir = env::var("SETTINGS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("edubot")
            });

        Ok(Self {
            server: ServerConfig {
                port: parse_var("PORT", "8000")?,
                host: var_or("HOST", "0.0.0.0"),
                cors_allowed_origins: split_list(&var_or(
                    "ALLOWED_ORIGINS",
                    "http://localhost:5173,http://localhost:3000",
                )),
                max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", "5242880")?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
                max_connections: parse_var("DB_MAX_CONNECTIONS", "10")?,
                min_connections: parse_var("DB_MIN_CONNECTIONS", "1")?,
            },
            auth: AuthConfig {
                jwt_secret: env::var("JWT_SECRET_KEY").context("JWT_SECRET_KEY must be set")?,
                jwt_expiry_days: parse_var("JWT_EXPIRY_DAYS", "30")?,
                allowed_domains: split_list(&var_or("AUTH_ALLOWED_DOMAINS", "")),
                admin_domains: split_list(&var_or("AUTH_ADMIN_DOMAINS", "")),
            },
            llm: LLMConfig {
                default_provider,
                openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
                openai_model: var_or("OPENAI_MODEL", "gpt-4"),
                openai_base_url: var_or("OPENAI_BASE_URL", crate::llm::openai::OPENAI_API_BASE),
                google_api_key: env::var("GOOGLE_API_KEY").unwrap_or_default(),
                gemini_model: var_or("GEMINI_MODEL", "gemini-2.0-flash-exp"),
                gemini_base_url: var_or("GEMINI_BASE_URL", crate::llm::google::GEMINI_API_BASE),
                ollama_base_url: var_or("OLLAMA_BASE_URL", "http://localhost:11434"),
                ollama_model: var_or("OLLAMA_MODEL", "gemma:7b"),
                toolless_models: match env::var("OLLAMA_TOOLLESS_MODELS") {
                    Ok(raw) => split_list(&raw),
                    Err(_) => DEFAULT_TOOLLESS_MODELS.iter().map(|s| s.to_string()).collect(),
                },
                request_timeout_secs: parse_var("LLM_TIMEOUT_SECS", "60")?,
                max_retries: parse_var("LLM_MAX_RETRIES", "2")?,
            },
            knowledge: KnowledgeConfig {
                data_dir: PathBuf::from(var_or("DATA_DIR", "./data")),
            },
            agent: AgentConfig {
                answer_policy,
                max_iterations: parse_var("AGENT_MAX_ITERATIONS", "5")?,
                timeout_secs: parse_var("AGENT_TIMEOUT_SECS", "120")?,
                memory_enabled: parse_var("AGENT_MEMORY_ENABLED", "true")?,
                memory_max_messages: parse_var("AGENT_MEMORY_MAX_MESSAGES", "200")?,
                memory_max_threads: parse_var("AGENT_MEMORY_MAX_THREADS", "10000")?,
            },
            rate_limit: RateLimitConfig {
                chat_per_minute: parse_var("CHAT_RATE_LIMIT_PER_MINUTE", "30")?,
            },
            logging: LoggingConfig {
                log_dir: env::var("LOG_DIR").ok().map(PathBuf::from),
            },
            settings_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list_trims_and_drops_empty() {
        assert_eq!(
            split_list(" a.edu, ,b.edu ,"),
            vec!["a.edu".to_string(), "b.edu".to_string()]
        );
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_agent_defaults_are_bounded() {
        let agent = AgentConfig::default();
        assert_eq!(agent.max_iterations, 5);
        assert_eq!(agent.answer_policy, AnswerPolicy::Strict);
        assert_eq!(agent.timeout(), Duration::from_secs(120));
    }
}
