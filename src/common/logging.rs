//! Logging and tracing configuration
//!
//! Hook runs usually happen unattended, so besides stderr the run is also
//! appended to a log file in the platform data directory when one exists.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::paths;

/// Name of the log file inside the log directory
const LOG_FILE: &str = "runs.log";

/// Keeps the file writer alive; drop it only at process exit
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Initialize tracing (stderr plus optional file)
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate, WARN for dependencies.
pub fn init() -> LogGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("notifier=info,warn"));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let file = paths::log_dir().and_then(|dir| {
        std::fs::create_dir_all(&dir).ok()?;
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(LOG_FILE)
            .build(&dir)
            .ok()?;
        let (writer, guard) = tracing_appender::non_blocking(appender);
        Some((writer, guard))
    });

    match file {
        Some((writer, guard)) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);

            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();

            LogGuard { _file: Some(guard) }
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();

            LogGuard { _file: None }
        }
    }
}
