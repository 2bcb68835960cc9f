//! Settings API Routes
//!
//! - GET  /api/settings/provider - Active provider and availability (any user)
//! - PUT  /api/settings/provider - Switch the active provider (admin)
//! - GET  /api/settings - Full settings with masked API keys (admin)
//! - PUT  /api/settings - Partial settings update (admin)
//! - POST /api/settings/test/{provider} - Test provider connection (admin)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, warn};

use super::{
    ProviderSelectionRequest, ProviderSelectionResponse, SettingsResponse, UpdateSettingsRequest,
};
use crate::llm::{ProviderKind, ProviderOverrides, ProviderSelector};
use crate::middleware::{AdminUser, AuthUser};
use crate::models::AppState;
use crate::types::{AppError, AppResult};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/settings/provider", get(get_provider).put(update_provider))
        .route("/api/settings", get(get_settings).put(update_settings))
        .route("/api/settings/test/{provider}", post(test_provider))
}

async fn provider_response(state: &AppState, overrides: &ProviderOverrides) -> ProviderSelectionResponse {
    let snapshot = state.provider_snapshot(overrides).await;
    ProviderSelectionResponse {
        ai_provider: snapshot.provider,
        available_providers: snapshot.available_providers(),
    }
}

async fn get_provider(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    overrides: ProviderOverrides,
) -> Json<ProviderSelectionResponse> {
    Json(provider_response(&state, &overrides).await)
}

async fn update_provider(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(request): Json<ProviderSelectionRequest>,
) -> AppResult<Json<ProviderSelectionResponse>> {
    state
        .settings
        .update(|s| {
            s.ai_provider = Some(request.ai_provider);
            Ok(())
        })
        .await?;

    info!(admin = %admin.email, provider = %request.ai_provider, "AI provider changed");
    Ok(Json(provider_response(&state, &ProviderOverrides::default()).await))
}

async fn get_settings(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> Json<SettingsResponse> {
    let settings = state.settings.snapshot().await;
    Json(SettingsResponse::from(&settings))
}

async fn update_settings(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(request): Json<UpdateSettingsRequest>,
) -> AppResult<impl IntoResponse> {
    let settings = state.settings.update(|s| s.apply(request)).await?;

    info!(admin = %admin.email, "Settings updated");
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Settings saved successfully",
        "settings": SettingsResponse::from(&settings),
    })))
}

/// Build the named provider from the current settings and ask it to list
/// its models
async fn test_provider(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(provider): Path<String>,
) -> AppResult<impl IntoResponse> {
    let kind: ProviderKind = provider.parse().map_err(AppError::InvalidRequest)?;
    if kind == ProviderKind::Auto {
        return Err(AppError::InvalidRequest(
            "Pick a concrete provider to test: openai, gemini or ollama".to_string(),
        ));
    }

    let mut snapshot = state.provider_snapshot(&ProviderOverrides::default()).await;
    snapshot.provider = kind;

    let outcome = match ProviderSelector::select(&snapshot) {
        Ok(model) => model.adapter.check_connection().await,
        Err(e) => Err(e),
    };

    Ok(match outcome {
        Ok(message) => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "message": message })),
        ),
        Err(e) => {
            warn!(provider = %kind, error = %e, "Provider connection test failed");
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "success": false, "error": e.to_string() })),
            )
        }
    })
}
