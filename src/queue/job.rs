//! Job records and queue policies.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::PlanRequest;

/// Derive the job id for a plan. The id is a pure function of the plan
/// id, which is what makes enqueueing idempotent: the same plan can
/// never map to two units of work.
pub fn job_id_for_plan(plan_id: &str) -> String {
    format!("plan-{}", plan_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Durable record of one unit of work. Mutated only by the worker that
/// owns it; `progress` is non-decreasing within an attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub request: PlanRequest,
    pub state: JobState,
    pub attempts_made: u32,
    pub progress: u8,
    #[serde(default)]
    pub failed_reason: Option<String>,
    pub created_at_ms: u64,
    #[serde(default)]
    pub processed_on_ms: Option<u64>,
    #[serde(default)]
    pub finished_on_ms: Option<u64>,
}

/// Retry with exponential backoff: first retry after `backoff_base`,
/// doubling each time.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempts_made` failures.
    pub fn backoff_delay(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(16);
        self.backoff_base * 2u32.pow(exponent)
    }
}

/// Bounded retention of finished jobs. Failed jobs get higher bounds to
/// support debugging.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub completed_count: usize,
    pub completed_age_ms: u64,
    pub failed_count: usize,
    pub failed_age_ms: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            completed_count: 100,
            completed_age_ms: 1000 * 60 * 60 * 24 * 7,
            failed_count: 500,
            failed_age_ms: 1000 * 60 * 60 * 24 * 30,
        }
    }
}

/// Generation queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Worker tasks, i.e. maximum concurrent generations.
    pub workers: usize,
    /// Maximum queued jobs before enqueue refuses.
    pub max_queue_size: usize,
    pub retry: RetryPolicy,
    pub retention: RetentionPolicy,
    /// Job starts admitted per sliding window, protecting the upstream
    /// model's rate limits.
    pub admission_max_starts: usize,
    pub admission_window: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_queue_size: 1000,
            retry: RetryPolicy::default(),
            retention: RetentionPolicy::default(),
            admission_max_starts: 10,
            admission_window: Duration::from_secs(60),
        }
    }
}
