use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// HTTP and SQL libraries are capped at `warn` unless `RUST_LOG` says otherwise.
const LIBRARY_NOISE: &str = "reqwest=warn,hyper=warn,hyper_util=warn,sqlx=warn,lettre=warn";

/// Build the filter directive: `RUST_LOG` wins, else the configured level.
pub fn filter_directive(config: &LoggingConfig, rust_log: Option<&str>) -> String {
    match rust_log {
        Some(directive) if !directive.trim().is_empty() => directive.to_string(),
        _ => format!("{},{}", config.level.trim().to_lowercase(), LIBRARY_NOISE),
    }
}

/// Install the global subscriber: stdout, plus an appending file layer
/// when `logging.file` is set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = EnvFilter::try_new(filter_directive(config, rust_log.as_deref()))
        .with_context(|| format!("invalid log level '{}'", config.level))?;

    let file_layer = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stdout))
        .with(file_layer)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}
