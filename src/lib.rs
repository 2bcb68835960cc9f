// EduBot - University chatbot backend with a tool-augmented agent over a local knowledge base

pub mod agents;
pub mod config;
pub mod db;
pub mod knowledge;
pub mod llm;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod settings;
pub mod types;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use models::AppState;
// Note: Import specific items from types module instead of glob to avoid name conflicts
// e.g., use edubot::types::{LLMRequest, LLMResponse, AppResult};

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}
