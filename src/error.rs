//! Error types for the Larder meal plan pipeline.

use thiserror::Error;

/// Persistence-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Plan not found: {0}")]
    PlanNotFound(String),

    #[error("Profile not found for user: {0}")]
    ProfileNotFound(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Pipeline errors surfaced by the queue, scheduler and orchestrator
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Upstream call failed: {0}")]
    UpstreamCall(String),

    #[error("Upstream call timed out after {0} seconds")]
    UpstreamTimeout(u64),

    #[error("Provider authentication failed: {0}")]
    ProviderAuthFailed(String),

    #[error("Provider rate limit exceeded: {0}")]
    ProviderRateLimit(String),

    #[error("Provider model not found: {0}")]
    ProviderModelNotFound(String),

    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Retries exhausted after {attempts} attempts: {reason}")]
    RetryExhausted { attempts: u32, reason: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job already dispatched, cannot cancel: {0}")]
    JobNotCancelable(String),

    #[error("Queue is full")]
    QueueFull,

    #[error("Mail delivery failed: {0}")]
    MailFailed(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<config::ConfigError> for PlanError {
    fn from(err: config::ConfigError) -> Self {
        PlanError::ConfigError(err.to_string())
    }
}

impl PlanError {
    /// True when another attempt has a chance of succeeding.
    ///
    /// Validation failures are retryable: the model may produce a
    /// well-formed plan on the next attempt. Configuration problems are
    /// not; they fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            PlanError::ConfigError(_)
                | PlanError::ProviderNotConfigured(_)
                | PlanError::ProviderAuthFailed(_)
                | PlanError::ProviderModelNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_and_upstream_errors_are_retryable() {
        assert!(PlanError::ValidationFailed("missing nutrition".into()).is_retryable());
        assert!(PlanError::UpstreamCall("connection reset".into()).is_retryable());
        assert!(PlanError::UpstreamTimeout(120).is_retryable());
        assert!(PlanError::ProviderRateLimit("429".into()).is_retryable());
    }

    #[test]
    fn configuration_errors_are_not_retryable() {
        assert!(!PlanError::ConfigError("bad endpoint".into()).is_retryable());
        assert!(!PlanError::ProviderNotConfigured("anthropic".into()).is_retryable());
        assert!(!PlanError::ProviderAuthFailed("401".into()).is_retryable());
    }
}
