use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, LogFormat};

const DEFAULT_FILTER: &str = "info,tower_http=warn,hyper=warn";

/// Keeps the background log writer alive. Hold it until shutdown.
pub struct LoggingHandle {
    pub guard: WorkerGuard,
}

pub fn init_logging(config: &Config) -> anyhow::Result<LoggingHandle> {
    let filter_source = config
        .log_filter
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string());
    let filter =
        EnvFilter::try_new(&filter_source).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (writer, guard, destination) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::never(dir, "server.log");
            let (writer, guard) = tracing_appender::non_blocking(file_appender);
            (writer, guard, dir.join("server.log").display().to_string())
        }
        None => {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            (writer, guard, "stdout".to_string())
        }
    };

    let ansi = config.log_dir.is_none();
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Pretty => {
            registry
                .with(
                    fmt::layer()
                        .with_writer(writer)
                        .with_ansi(ansi)
                        .pretty()
                        .with_file(true)
                        .with_line_number(true)
                        .with_target(true),
                )
                .try_init()?;
        }
        LogFormat::Json => {
            registry
                .with(
                    fmt::layer()
                        .with_writer(writer)
                        .json()
                        .flatten_event(true)
                        .with_file(true)
                        .with_line_number(true)
                        .with_target(true)
                        .with_current_span(true),
                )
                .try_init()?;
        }
    }

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        destination = %destination,
        format = config.log_format.as_str(),
        filter = %filter_source,
    );

    Ok(LoggingHandle { guard })
}
