use axum::{extract::State, http::StatusCode, routing::{get, post}, Json, Router};
use tracing::info;
use validator::Validate;

use crate::config::AuthConfig;
use crate::db::DatabaseOperations;
use crate::middleware::{issue_token, AuthUser};
use crate::models::{AppState, LoginRequest, RegisterRequest, TokenResponse, UserResponse};
use crate::types::{AppError, AppResult};
use crate::utils::crypto::{hash_password, verify_password};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
}

fn email_domain(email: &str) -> String {
    email.rsplit('@').next().unwrap_or_default().trim().to_lowercase()
}

fn domain_listed(domains: &[String], domain: &str) -> bool {
    domains
        .iter()
        .any(|d| d.trim().trim_start_matches('@').eq_ignore_ascii_case(domain))
}

/// Reject emails outside the allowlist; an empty allowlist admits everyone
fn check_registration_domain(config: &AuthConfig, email: &str) -> AppResult<()> {
    if config.allowed_domains.is_empty() {
        return Ok(());
    }
    if domain_listed(&config.allowed_domains, &email_domain(email)) {
        return Ok(());
    }
    let listed = config
        .allowed_domains
        .iter()
        .map(|d| format!("@{}", d.trim().trim_start_matches('@')))
        .collect::<Vec<_>>()
        .join(" and ");
    Err(AppError::InvalidRequest(format!(
        "Only {} email addresses are allowed",
        listed
    )))
}

async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<TokenResponse>)> {
    request.validate()?;
    let auth = &state.config.auth;
    check_registration_domain(auth, &request.email)?;

    if let Some(existing) =
        DatabaseOperations::find_user_by_username_or_email(&state.pool, &request.username, &request.email).await?
    {
        let detail = if existing.username == request.username {
            "Username already registered"
        } else {
            "Email already registered"
        };
        return Err(AppError::InvalidRequest(detail.to_string()));
    }

    let is_admin = domain_listed(&auth.admin_domains, &email_domain(&request.email));
    let password = request.password.clone();
    let hashed = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AppError::Internal(format!("Password hashing task failed: {}", e)))??;

    let user = DatabaseOperations::create_user(
        &state.pool,
        request.email.trim(),
        request.username.trim(),
        &hashed,
        is_admin,
    )
    .await?;

    info!(user_id = %user.id, is_admin, "Registered new user");
    let token = issue_token(auth, user.id)?;
    Ok((StatusCode::CREATED, Json(TokenResponse::bearer(token, &user))))
}

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    request.validate()?;

    let user = DatabaseOperations::find_user_by_email(&state.pool, &request.email).await?;
    let Some(user) = user else {
        return Err(AppError::Auth("Incorrect email or password".to_string()));
    };

    let password = request.password;
    let stored = user.hashed_password.clone();
    let valid = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
        .await
        .map_err(|e| AppError::Internal(format!("Password check task failed: {}", e)))?;
    if !valid {
        return Err(AppError::Auth("Incorrect email or password".to_string()));
    }

    if !user.is_active {
        return Err(AppError::Forbidden("User account is inactive".to_string()));
    }

    info!(user_id = %user.id, "User logged in");
    let token = issue_token(&state.config.auth, user.id)?;
    Ok(Json(TokenResponse::bearer(token, &user)))
}

async fn me(AuthUser(user): AuthUser) -> Json<UserResponse> {
    Json(UserResponse::from(&user))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_config(allowed: &[&str]) -> AuthConfig {
        AuthConfig {
            jwt_secret: "secret".to_string(),
            jwt_expiry_days: 30,
            allowed_domains: allowed.iter().map(|d| d.to_string()).collect(),
            admin_domains: vec!["staff.university.edu".to_string()],
        }
    }

    #[test]
    fn test_empty_allowlist_admits_any_domain() {
        assert!(check_registration_domain(&auth_config(&[]), "someone@gmail.com").is_ok());
    }

    #[test]
    fn test_allowlist_is_case_insensitive() {
        let config = auth_config(&["university.edu", "@staff.university.edu"]);
        assert!(check_registration_domain(&config, "Student@University.EDU").is_ok());
        assert!(check_registration_domain(&config, "prof@staff.university.edu").is_ok());

        let err = check_registration_domain(&config, "someone@gmail.com").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid request: Only @university.edu and @staff.university.edu email addresses are allowed"
        );
    }

    #[test]
    fn test_admin_domain_detection() {
        let config = auth_config(&[]);
        assert!(domain_listed(&config.admin_domains, &email_domain("dean@staff.university.edu")));
        assert!(!domain_listed(&config.admin_domains, &email_domain("student@university.edu")));
    }
}
