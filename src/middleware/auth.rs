// Bearer-token authentication
//
// Tokens are HS256 JWTs whose `sub` is the user id. Extractors re-read the
// user on every request so deactivation takes effect immediately.

use axum::{extract::FromRequestParts, http::header::AUTHORIZATION, http::request::Parts};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::db::DatabaseOperations;
use crate::models::{AppState, User};
use crate::types::{AppError, AppResult};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

pub fn issue_token(config: &AuthConfig, user_id: Uuid) -> AppResult<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::days(config.jwt_expiry_days)).timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))
}

pub fn verify_token(config: &AuthConfig, token: &str) -> AppResult<Uuid> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| AppError::Auth("Could not validate credentials".to_string()))?;

    Uuid::parse_str(&data.claims.sub)
        .map_err(|_| AppError::Auth("Could not validate credentials".to_string()))
}

fn bearer_token(parts: &Parts) -> AppResult<&str> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Auth("Not authenticated".to_string()))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::Auth("Not authenticated".to_string()))?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(AppError::Auth("Not authenticated".to_string()));
    }
    Ok(token.trim())
}

/// An authenticated, active user
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let user_id = verify_token(&state.config.auth, token)?;

        let user = DatabaseOperations::find_user_by_id(&state.pool, user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| AppError::Auth("User not found or inactive".to_string()))?;

        Ok(AuthUser(user))
    }
}

/// An authenticated user with admin privileges
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            return Err(AppError::Forbidden("Admin privileges required".to_string()));
        }
        Ok(AdminUser(user))
    }
}
