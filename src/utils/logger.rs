// Logger initialization

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_LOG_FILTER: &str = "edubot=debug,tower_http=debug,axum=debug";

/// Install the global subscriber.
///
/// Logs always go to stdout. With `log_dir` set they are also written to a
/// daily-rolling file; the returned guard must live until shutdown so the
/// background writer can flush.
pub fn init_logger(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "edubot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}
