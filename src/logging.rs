//! Logging System
//!
//! Structured logging via the `tracing` crate, with configurable level,
//! format and destination. Environment variables (`LARDER_LOG`,
//! `LARDER_LOG_FORMAT`, `LARDER_LOG_OUTPUT`) override the config file.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::error::PlanError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    Stderr,
    File,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error, off
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_format")]
    pub format: LogFormat,

    #[serde(default = "default_output")]
    pub output: LogOutput,

    /// Log file path when output is `file`.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Colored output (text format on a terminal only).
    #[serde(default = "default_true")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_format() -> LogFormat {
    LogFormat::Text
}

fn default_output() -> LogOutput {
    LogOutput::Stdout
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_format(),
            output: default_output(),
            file: None,
            color: default_true(),
        }
    }
}

/// Initialize the logging system.
///
/// Priority order (highest to lowest): `LARDER_LOG*` environment
/// variables, then the provided configuration, then defaults.
pub fn init_logging(config: &LoggingConfig) -> Result<(), PlanError> {
    let filter = build_env_filter(config)?;
    let format = env_format().unwrap_or(config.format);
    let output = env_output().unwrap_or(config.output);

    let base = Registry::default().with(filter);

    match output {
        LogOutput::File => {
            let path = config
                .file
                .clone()
                .unwrap_or_else(|| PathBuf::from("larder.log"));
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        PlanError::ConfigError(format!("Failed to create log directory: {}", e))
                    })?;
                }
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| {
                    PlanError::ConfigError(format!("Failed to open log file {:?}: {}", path, e))
                })?;
            match format {
                LogFormat::Json => base
                    .with(
                        fmt::layer()
                            .json()
                            .with_target(true)
                            .with_timer(ChronoUtc::rfc_3339())
                            .with_writer(file),
                    )
                    .init(),
                LogFormat::Text => base
                    .with(
                        fmt::layer()
                            .with_target(true)
                            .with_timer(ChronoUtc::rfc_3339())
                            .with_ansi(false)
                            .with_writer(file),
                    )
                    .init(),
            }
        }
        LogOutput::Stderr => match format {
            LogFormat::Json => base
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_writer(std::io::stderr),
                )
                .init(),
            LogFormat::Text => base
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_ansi(config.color)
                        .with_writer(std::io::stderr),
                )
                .init(),
        },
        LogOutput::Stdout => match format {
            LogFormat::Json => base
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_writer(std::io::stdout),
                )
                .init(),
            LogFormat::Text => base
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_ansi(config.color)
                        .with_writer(std::io::stdout),
                )
                .init(),
        },
    }

    Ok(())
}

fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, PlanError> {
    if let Ok(filter) = EnvFilter::try_from_env("LARDER_LOG") {
        return Ok(filter);
    }
    if config.level == "off" {
        return Ok(EnvFilter::new("off"));
    }
    EnvFilter::try_new(&config.level).map_err(|e| {
        PlanError::ConfigError(format!("Invalid log level '{}': {}", config.level, e))
    })
}

fn env_format() -> Option<LogFormat> {
    match std::env::var("LARDER_LOG_FORMAT").ok()?.as_str() {
        "json" => Some(LogFormat::Json),
        "text" => Some(LogFormat::Text),
        _ => None,
    }
}

fn env_output() -> Option<LogOutput> {
    match std::env::var("LARDER_LOG_OUTPUT").ok()?.as_str() {
        "stdout" => Some(LogOutput::Stdout),
        "stderr" => Some(LogOutput::Stderr),
        "file" => Some(LogOutput::File),
        _ => None,
    }
}
