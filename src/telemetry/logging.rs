//! Logging configuration and initialization.
//!
//! Supports:
//! - Environment variable (RUST_LOG) configuration
//! - the `[logging]` section of apfd.toml
//! - Multiple output formats (pretty, compact, json)

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Logging configuration from apfd.toml.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_level")]
    pub level: String,
    /// Output format: pretty, compact, json
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "pretty".to_string()
}

impl LogConfig {
    /// Creates a new LogConfig with default values.
    pub fn new() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Output format of the fmt layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "pretty" => Some(LogFormat::Pretty),
            "compact" => Some(LogFormat::Compact),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Initializes the logging system.
///
/// Priority:
/// 1. RUST_LOG environment variable (if set)
/// 2. config parameter (if provided)
/// 3. Default: info level, pretty format
///
/// Levels from the config apply to apfd itself; other crates log warnings
/// and errors only.
pub fn init_logging(config: Option<&LogConfig>) {
    let env_filter = match config {
        _ if std::env::var_os("RUST_LOG").is_some() => EnvFilter::from_default_env(),
        Some(cfg) => EnvFilter::new(filter_directive(parse_level(&cfg.level))),
        None => EnvFilter::new(filter_directive(Level::INFO)),
    };

    let format = config
        .and_then(|c| LogFormat::from_name(&c.format))
        .unwrap_or(LogFormat::Pretty);

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_span_events(FmtSpan::CLOSE),
            ),
        ),
        LogFormat::Compact => tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer().compact().with_target(false)),
        ),
        LogFormat::Pretty => {
            tracing::subscriber::set_global_default(registry.with(tracing_subscriber::fmt::layer()))
        }
    };
    // a subscriber installed earlier (tests) keeps receiving events
    let _ = result;
}

fn filter_directive(level: Level) -> String {
    format!("warn,apfd={}", level.as_str().to_lowercase())
}

/// Whether `format` names a supported output format.
pub fn is_known_format(format: &str) -> bool {
    LogFormat::from_name(format).is_some()
}

/// Parses a log level string into a Level.
fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Whether `level` is one of the names [`parse_level`] understands.
pub fn is_known_level(level: &str) -> bool {
    matches!(
        level.to_lowercase().as_str(),
        "error" | "warn" | "info" | "debug" | "trace"
    )
}
