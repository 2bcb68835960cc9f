use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::info;

use crate::knowledge::{Category, DocumentInfo};
use crate::middleware::AdminUser;
use crate::models::AppState;
use crate::types::{AppError, AppResult};

pub fn router() -> Router<AppState> {
    Router::new().route("/api/files/{category}", get(list_files).post(upload_file))
}

async fn list_files(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(category): Path<String>,
) -> AppResult<Json<Vec<DocumentInfo>>> {
    let category: Category = category.parse()?;
    Ok(Json(state.documents().describe_documents(category).await?))
}

/// Multipart upload; the document is read from the `file` field
async fn upload_file(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(category): Path<String>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<DocumentInfo>)> {
    let category: Category = category.parse()?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidRequest(format!("Malformed upload: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::InvalidRequest("Upload is missing a file name".to_string()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::InvalidRequest(format!("Failed to read upload: {}", e)))?;

        let stored = state
            .documents()
            .store_document(category, &filename, &bytes)
            .await?;
        info!(admin = %admin.email, category = %category, filename = %stored.filename, "Document uploaded");
        return Ok((StatusCode::CREATED, Json(stored)));
    }

    Err(AppError::InvalidRequest("Multipart field 'file' is required".to_string()))
}
