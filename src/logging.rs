//! Tracing Infrastructure
//!
//! Structured logging for scans, built on `tracing` and `tracing-subscriber`:
//! - Structured events with fields (sweep index, positions, rates)
//! - Pretty, compact or JSON output
//! - `RUST_LOG` filtering, falling back to the configured level
//!
//! # Example
//! ```no_run
//! use ple_daq::{config::PleConfig, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PleConfig::load()?;
//! logging::init_from_config(&config)?;
//! info!(sweep = 0, "Scan started");
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::PleConfig;
use crate::error::{AppResult, ScanError};

/// Output format for tracing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Pretty-printed format with colors (for development)
    Pretty,
    /// Compact format without colors (for production)
    #[default]
    Compact,
    /// JSON format for structured logging (for log aggregation)
    Json,
}

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Whether to include span close events (one per sweep)
    pub with_span_events: bool,
    /// Whether to include file and line numbers
    pub with_file_and_line: bool,
    /// Whether to enable ANSI colors (only for Pretty format)
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_span_events: false,
            with_file_and_line: false,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Create tracing config from application configuration
    pub fn from_config(config: &PleConfig) -> AppResult<Self> {
        let application = &config.application;
        Ok(Self {
            level: parse_log_level(&application.log_level)?,
            format: application.log_format,
            with_span_events: application.log_span_events,
            with_ansi: std::io::stdout().is_terminal(),
            ..Default::default()
        })
    }

    /// Create tracing config with custom settings
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable span events
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize tracing from application configuration
pub fn init_from_config(config: &PleConfig) -> AppResult<()> {
    init(TracingConfig::from_config(config)?)
}

/// Initialize tracing with custom configuration
///
/// Idempotent: if a global subscriber is already installed this returns
/// Ok(()) and leaves it in place.
pub fn init(config: TracingConfig) -> AppResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let span_events = if config.with_span_events {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_ansi(config.with_ansi)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_ansi(false)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_filter(env_filter)
            .boxed(),
    };

    match tracing_subscriber::registry().with(layer).try_init() {
        Ok(()) => Ok(()),
        // Expected in tests and when several components race to init
        Err(e) if e.to_string().contains("already") => Ok(()),
        Err(e) => Err(ScanError::Configuration(format!(
            "Failed to initialize tracing: {e}"
        ))),
    }
}

/// Parse log level string into tracing Level
fn parse_log_level(level: &str) -> AppResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(ScanError::Configuration(format!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));

        // Case insensitive
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("Debug"), Ok(Level::DEBUG)));

        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_tracing_config_from_app_config() {
        let mut config = PleConfig::default();
        config.application.log_level = "debug".to_string();

        let tracing_config = TracingConfig::from_config(&config).unwrap();
        assert_eq!(tracing_config.level, Level::DEBUG);
        assert_eq!(tracing_config.format, OutputFormat::Compact);
        assert!(!tracing_config.with_span_events);

        config.application.log_format = OutputFormat::Json;
        config.application.log_span_events = true;
        let tracing_config = TracingConfig::from_config(&config).unwrap();
        assert_eq!(tracing_config.format, OutputFormat::Json);
        assert!(tracing_config.with_span_events);
    }

    #[test]
    fn test_output_format_names() {
        let format: OutputFormat = serde_json::from_str("\"pretty\"").unwrap();
        assert_eq!(format, OutputFormat::Pretty);
        assert!(serde_json::from_str::<OutputFormat>("\"fancy\"").is_err());
    }

    #[test]
    fn test_tracing_config_builder() {
        let config = TracingConfig::new(Level::WARN)
            .with_format(OutputFormat::Json)
            .with_span_events(true)
            .with_ansi(false);

        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, OutputFormat::Json);
        assert!(config.with_span_events);
        assert!(!config.with_ansi);
    }

    #[test]
    fn test_init_is_idempotent() {
        assert!(init(TracingConfig::default()).is_ok());
        assert!(init(TracingConfig::default()).is_ok());
    }
}
