use axum::{extract::State, routing::get, Json, Router};

use crate::db;
use crate::models::{AppState, HealthResponse};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/api/health", get(health_check))
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "EduBot API - University Chatbot",
        "version": env!("CARGO_PKG_VERSION"),
        "agent": "tool-augmented agent loop",
    }))
}

/// Always 200; the body reports whether the database answered
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let connected = db::ping(&state.pool).await;
    Json(HealthResponse {
        status: if connected { "healthy" } else { "degraded" }.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        database: if connected { "connected" } else { "disconnected" }.to_string(),
    })
}
