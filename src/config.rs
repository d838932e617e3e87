//! Configuration System
//!
//! Layered configuration: defaults, then an optional `larder.toml`,
//! then `LARDER_*` environment overrides. Validated after load so a bad
//! file fails fast rather than at the first job.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::PlanError;
use crate::logging::LoggingConfig;
use crate::provider::ProviderConfig;
use crate::queue::{QueueConfig, RetentionPolicy, RetryPolicy};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LarderConfig {
    /// Data directory for the sled database (defaults to the platform
    /// data dir).
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    /// Named model provider configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub lookup: LookupSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Generation worker tasks (maximum concurrent generations).
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay; doubles each retry.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Job starts admitted per window.
    #[serde(default = "default_admission_max_starts")]
    pub admission_max_starts: usize,
    #[serde(default = "default_admission_window_secs")]
    pub admission_window_secs: u64,
    #[serde(default = "default_completed_retention_count")]
    pub completed_retention_count: usize,
    #[serde(default = "default_completed_retention_days")]
    pub completed_retention_days: u64,
    #[serde(default = "default_failed_retention_count")]
    pub failed_retention_count: usize,
    #[serde(default = "default_failed_retention_days")]
    pub failed_retention_days: u64,
}

fn default_workers() -> usize {
    2
}
fn default_max_queue_size() -> usize {
    1000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    2000
}
fn default_admission_max_starts() -> usize {
    10
}
fn default_admission_window_secs() -> u64 {
    60
}
fn default_completed_retention_count() -> usize {
    100
}
fn default_completed_retention_days() -> u64 {
    7
}
fn default_failed_retention_count() -> usize {
    500
}
fn default_failed_retention_days() -> u64 {
    30
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_queue_size: default_max_queue_size(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            admission_max_starts: default_admission_max_starts(),
            admission_window_secs: default_admission_window_secs(),
            completed_retention_count: default_completed_retention_count(),
            completed_retention_days: default_completed_retention_days(),
            failed_retention_count: default_failed_retention_count(),
            failed_retention_days: default_failed_retention_days(),
        }
    }
}

impl QueueSettings {
    pub fn to_queue_config(&self) -> QueueConfig {
        QueueConfig {
            workers: self.workers,
            max_queue_size: self.max_queue_size,
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                backoff_base: Duration::from_millis(self.backoff_base_ms),
            },
            retention: RetentionPolicy {
                completed_count: self.completed_retention_count,
                completed_age_ms: self.completed_retention_days * 24 * 60 * 60 * 1000,
                failed_count: self.failed_retention_count,
                failed_age_ms: self.failed_retention_days * 24 * 60 * 60 * 1000,
            },
            admission_max_starts: self.admission_max_starts,
            admission_window: Duration::from_secs(self.admission_window_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Provider name jobs resolve against; optional when exactly one
    /// provider is configured.
    #[serde(default)]
    pub default_provider: Option<String>,
    /// Model id stamped onto scheduled requests.
    #[serde(default = "default_model")]
    pub default_model: String,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            default_provider: None,
            default_model: default_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupSettings {
    /// Store search endpoint used by the offline product lookup.
    #[serde(default = "default_search_base_url")]
    pub search_base_url: String,
}

fn default_search_base_url() -> String {
    "https://www.heb.com/search".to_string()
}

impl Default for LookupSettings {
    fn default() -> Self {
        Self {
            search_base_url: default_search_base_url(),
        }
    }
}

impl LarderConfig {
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.queue.workers == 0 {
            return Err(PlanError::ConfigError(
                "queue.workers must be at least 1".to_string(),
            ));
        }
        if self.queue.max_attempts == 0 {
            return Err(PlanError::ConfigError(
                "queue.max_attempts must be at least 1".to_string(),
            ));
        }
        for (name, provider) in &self.providers {
            provider
                .validate()
                .map_err(|e| PlanError::ConfigError(format!("provider '{}': {}", name, e)))?;
        }
        if let Some(default) = &self.scheduler.default_provider {
            if !self.providers.contains_key(default) {
                return Err(PlanError::ConfigError(format!(
                    "scheduler.default_provider '{}' is not a configured provider",
                    default
                )));
            }
        }
        Ok(())
    }

    /// Resolve the data directory: explicit config, else the platform
    /// data dir, else a local fallback.
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("", "", "larder")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".larder"))
    }
}

/// Loads configuration from files and environment.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load with the default search path: `larder.toml` in the current
    /// directory if present, then `LARDER_*` environment overrides
    /// (`LARDER_QUEUE__WORKERS=4` style).
    pub fn load() -> Result<LarderConfig, PlanError> {
        Self::build(None)
    }

    /// Load from an explicit file path (plus environment overrides).
    pub fn load_from_file(path: &Path) -> Result<LarderConfig, PlanError> {
        Self::build(Some(path))
    }

    fn build(explicit: Option<&Path>) -> Result<LarderConfig, PlanError> {
        let mut builder = Config::builder();
        builder = match explicit {
            Some(path) => builder.add_source(File::from(path)),
            None => builder.add_source(File::with_name("larder").required(false)),
        };
        builder = builder.add_source(
            Environment::with_prefix("LARDER")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: LarderConfig = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }
}
