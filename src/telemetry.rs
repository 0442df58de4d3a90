//! Structured logging setup.
//!
//! Reads its settings from the environment:
//!
//! | variable                 | values                          | default |
//! |--------------------------|---------------------------------|---------|
//! | `BOOT_LOG_LEVEL`         | trace/debug/info/warn/error     | `info`  |
//! | `BOOT_LOG_FORMAT`        | json/pretty                     | `json`  |
//! | `BOOT_LOG_ASYNC`         | true/false                      | `false` |
//! | `BOOT_LOG_TARGET_FILTER` | comma-separated filter directives | unset |
//!
//! `RUST_LOG`, when set, overrides `BOOT_LOG_LEVEL`.

use std::env;

use anyhow::{Context, Result};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log format: JSON for production, pretty-print for development
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// trace/debug/info/warn/error
    pub log_level: String,
    pub format: LogFormat,
    /// Write through a background thread
    pub async_logging: bool,
    /// Extra filter directives, comma-separated
    pub target_filter: Option<String>,
    /// Include file:line location (dev only)
    pub include_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            format: LogFormat::Json,
            async_logging: false,
            target_filter: None,
            include_location: false,
        }
    }
}

impl LogConfig {
    /// Parse configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_level: env::var("BOOT_LOG_LEVEL").unwrap_or(defaults.log_level),
            format: env::var("BOOT_LOG_FORMAT")
                .map(|f| LogFormat::parse(&f))
                .unwrap_or(defaults.format),
            async_logging: env::var("BOOT_LOG_ASYNC")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.async_logging),
            target_filter: env::var("BOOT_LOG_TARGET_FILTER").ok(),
            include_location: defaults.include_location,
        }
    }

    /// Pretty, debug-level, synchronous output
    #[must_use]
    pub fn default_dev() -> Self {
        Self {
            log_level: "debug".to_string(),
            format: LogFormat::Pretty,
            async_logging: false,
            target_filter: None,
            include_location: true,
        }
    }

    #[must_use]
    pub fn level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    /// The filter this config resolves to, `RUST_LOG` taking precedence.
    #[must_use]
    pub fn env_filter(&self) -> EnvFilter {
        let mut env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level().as_str()));
        if let Ok(directive) = "may_minihttp=warn".parse() {
            env_filter = env_filter.add_directive(directive);
        }
        if let Some(target_filter) = &self.target_filter {
            for filter in target_filter.split(',').map(str::trim).filter(|f| !f.is_empty()) {
                match filter.parse() {
                    Ok(directive) => env_filter = env_filter.add_directive(directive),
                    Err(_) => eprintln!("Warning: Invalid log filter directive: {filter}"),
                }
            }
        }
        env_filter
    }
}

/// Install the global subscriber.
///
/// With `async_logging` the returned guard must be kept alive; dropping it
/// flushes and stops the writer thread.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let registry = tracing_subscriber::registry().with(config.env_filter());

    let (writer, guard) = if config.async_logging {
        let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());
        (tracing_subscriber::fmt::writer::BoxMakeWriter::new(non_blocking), Some(guard))
    } else {
        (tracing_subscriber::fmt::writer::BoxMakeWriter::new(std::io::stdout), None)
    };

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
    };

    registry
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize logging")?;
    Ok(guard)
}
