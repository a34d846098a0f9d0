//! Logging system initialization and configuration
//!
//! Uses the tracing ecosystem for structured logging with support for:
//! - Environment variable override (MZFLOW_LOG)
//! - Console output in pretty, compact or JSON form
//! - File output with daily rotation

use std::path::PathBuf;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Environment variable holding a filter directive that overrides `level`
pub const LOG_ENV_VAR: &str = "MZFLOW_LOG";

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default log level
    pub level: Level,
    /// Output format: "pretty", "json", "compact"
    pub format: LogFormat,
    /// Show timestamps
    pub timestamps: bool,
    /// Show file and line numbers
    pub file_line: bool,
    /// Enable file output
    pub file_output: bool,
    /// Log file directory path
    pub file_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            timestamps: true,
            file_line: false,
            file_output: false,
            file_path: None,
        }
    }
}

impl From<&crate::config::LoggingConfig> for LoggingConfig {
    fn from(config: &crate::config::LoggingConfig) -> Self {
        Self {
            level: parse_level(&config.level),
            format: LogFormat::parse(&config.format),
            timestamps: config.timestamps,
            file_line: config.file_line,
            file_output: config.file_output,
            file_path: config.file_path.clone(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Compact,
        }
    }
}

/// Get the default log directory path
fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mzflow")
        .join("logs")
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn console_layer(config: &LoggingConfig) -> BoxedLayer {
    let base = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_thread_names(true)
        .with_file(config.file_line)
        .with_line_number(config.file_line);

    match (config.format, config.timestamps) {
        (LogFormat::Json, _) => base.json().boxed(),
        (LogFormat::Pretty, true) => base.pretty().boxed(),
        (LogFormat::Pretty, false) => base.pretty().without_time().boxed(),
        (LogFormat::Compact, true) => base.compact().boxed(),
        (LogFormat::Compact, false) => base.compact().without_time().boxed(),
    }
}

fn file_layer(config: &LoggingConfig) -> Option<BoxedLayer> {
    if !config.file_output {
        return None;
    }
    let log_dir = config.file_path.clone().unwrap_or_else(default_log_dir);

    // Ensure log directory exists
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Failed to create log directory {:?}: {}", log_dir, e);
        return None;
    }
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "mzflow.log");

    let layer = fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE);
    Some(layer.boxed())
}

/// Initialize the logging system.
///
/// Returns `false` if a global subscriber was already installed, in which
/// case the existing one stays in place.
///
/// # Environment Variables
/// - `MZFLOW_LOG`: Override log level (e.g., "mzflow=debug,mzflow::infrastructure=trace")
pub fn init_logging(config: &LoggingConfig) -> bool {
    // Build the environment filter
    let env_filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| {
        EnvFilter::new(format!("mzflow={}", config.level.as_str().to_lowercase()))
    });

    let mut layers = vec![console_layer(config)];
    layers.extend(file_layer(config));

    // Filter is added last so the boxed layers stay typed on `Registry`.
    let installed = tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Logging initialized");
        tracing::debug!(
            level = %config.level,
            format = ?config.format,
            file_output = config.file_output,
            "Logging configuration"
        );
    }
    installed
}

/// Parse log level from string
pub fn parse_level(s: &str) -> Level {
    match s.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}
