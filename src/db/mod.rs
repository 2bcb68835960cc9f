use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::DatabaseConfig;

pub use operations::*;

pub mod operations;

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.url)
        .await
        .context("Failed to connect to the database")?;

    // Test connection
    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .context("Database did not answer SELECT 1")?;

    Ok(pool)
}

/// Liveness probe used by the health endpoints
pub async fn ping(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}
