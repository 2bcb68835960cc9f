use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};

use edubot::{config::Config, db, settings::SettingsHandle, utils::init_logger, AppState};

#[derive(Parser)]
#[command(name = "edubot", version, about = "University chatbot backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Grant admin rights to existing users of an email domain
    PromoteAdmins {
        #[arg(long)]
        domain: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env()?;
    let _log_guard = init_logger(config.logging.log_dir.as_deref());
    info!(host = %config.server.host, port = config.server.port, "Configuration loaded");

    // Connect to database
    let pool = db::create_pool(&config.database).await?;

    // Run migrations
    info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    info!("Database migrations completed");

    match cli.command.unwrap_or(Command::Serve) {
        Command::PromoteAdmins { domain } => {
            let promoted = db::DatabaseOperations::promote_admins_by_domain(&pool, &domain).await?;
            if promoted == 0 {
                warn!(domain = %domain, "No non-admin users found for domain");
            } else {
                info!(domain = %domain, promoted, "Promoted users to admin");
            }
            Ok(())
        }
        Command::Serve => serve(pool, config).await,
    }
}

async fn serve(pool: sqlx::PgPool, config: Config) -> anyhow::Result<()> {
    let settings = SettingsHandle::load(&config.settings_dir)
        .await
        .context("Failed to load settings")?;
    let documents = config.knowledge.data_dir.clone();
    let addr = format!("{}:{}", config.server.host, config.server.port);

    // Create shared state
    let state = AppState::new(pool, config, settings)?;
    let app = edubot::create_router(state);

    info!(data_dir = %documents.display(), "Knowledge base directory");
    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
