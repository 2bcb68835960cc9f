use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::agents::{AgentLoop, SharedAgent};
use crate::config::Config;
use crate::knowledge::{DocumentStore, SearchTools};
use crate::llm::{HttpOptions, ProviderOverrides, ProviderSnapshot};
use crate::middleware::ChatRateLimiter;
use crate::settings::SettingsHandle;
use crate::types::AppResult;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub settings: SettingsHandle,
    pub tools: SearchTools,
    pub agent: SharedAgent,
    pub chat_limiter: ChatRateLimiter,
    pub http: HttpOptions,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, settings: SettingsHandle) -> AppResult<Self> {
        let tools = SearchTools::new(DocumentStore::new(config.knowledge.data_dir.clone()));
        let agent = Arc::new(AgentLoop::new(tools.clone(), config.agent.clone()));
        let chat_limiter = ChatRateLimiter::per_minute(config.rate_limit.chat_per_minute);
        let http = HttpOptions::new(config.llm.request_timeout(), config.llm.max_retries)?;
        Ok(Self {
            pool,
            config,
            settings,
            tools,
            agent,
            chat_limiter,
            http,
        })
    }

    pub fn documents(&self) -> &DocumentStore {
        self.tools.store()
    }

    /// Provider view for one request: env, then saved settings, then headers
    pub async fn provider_snapshot(&self, overrides: &ProviderOverrides) -> ProviderSnapshot {
        let settings = self.settings.snapshot().await;
        ProviderSnapshot::from_sources(&self.config.llm, &settings, overrides, &self.http)
    }
}

// Database rows
// Note: FromRow is needed for runtime query_as (without DATABASE_URL at compile time)

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub hashed_password: String,
    pub is_active: bool,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Chat {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

/// One persisted exchange: the user's text and the final answer
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChatMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub human: String,
    pub bot: String,
    pub created_at: DateTime<Utc>,
}

// API Request/Response types

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 3, max = 50, message = "Username must be 3-50 characters"))]
    pub username: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub username: String,
    pub is_active: bool,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            email: user.email.clone(),
            username: user.username.clone(),
            is_active: user.is_active,
            is_admin: user.is_admin,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub user: UserResponse,
}

impl TokenResponse {
    pub fn bearer(access_token: String, user: &User) -> Self {
        Self {
            access_token,
            token_type: "bearer",
            user: UserResponse::from(user),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Chat> for ChatResponse {
    fn from(chat: &Chat) -> Self {
        Self {
            id: chat.id.to_string(),
            title: chat.title.clone(),
            created_at: chat.created_at,
            updated_at: chat.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct MessageCreate {
    #[serde(default)]
    pub chat_id: Option<String>,
    #[validate(length(min = 1, max = 5000, message = "Message must be 1-5000 characters"))]
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: String,
    pub chat_id: String,
    pub human: String,
    pub bot: String,
    pub created_at: DateTime<Utc>,
}

impl From<&ChatMessage> for MessageResponse {
    fn from(message: &ChatMessage) -> Self {
        Self {
            id: message.id.to_string(),
            chat_id: message.chat_id.to_string(),
            human: message.human.clone(),
            bot: message.bot.clone(),
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatWithMessages {
    pub id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<MessageResponse>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChatRename {
    #[validate(length(min = 1, max = 255, message = "Title must be 1-255 characters"))]
    pub title: String,
}

/// Answer returned by the non-streaming prompt endpoints
#[derive(Debug, Serialize)]
pub struct PromptResponse {
    pub success: bool,
    pub chat_id: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

impl ActionResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub database: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_length_limits() {
        let empty = MessageCreate { chat_id: None, message: String::new() };
        assert!(empty.validate().is_err());

        let max = MessageCreate { chat_id: None, message: "é".repeat(5000) };
        assert!(max.validate().is_ok());

        let over = MessageCreate { chat_id: None, message: "a".repeat(5001) };
        assert!(over.validate().is_err());
    }

    #[test]
    fn test_register_validation() {
        let ok = RegisterRequest {
            email: "student@university.edu".to_string(),
            username: "student".to_string(),
            password: "secret1".to_string(),
        };
        assert!(ok.validate().is_ok());

        let bad = RegisterRequest {
            email: "not-an-email".to_string(),
            username: "ab".to_string(),
            password: "123".to_string(),
        };
        let errors = bad.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("username"));
        assert!(fields.contains_key("password"));
    }
}
