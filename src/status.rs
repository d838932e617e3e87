//! Read-only job status projection.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::PlanError;
use crate::queue::{JobState, PlanQueue};

/// Externally visible view of one job. Never exposes the request
/// payload; pollers only need lifecycle and progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: String,
    pub status: JobState,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_on: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_on: Option<u64>,
}

/// Projects job state for external callers. Never mutates anything.
pub struct StatusService {
    queue: Arc<PlanQueue>,
}

impl StatusService {
    pub fn new(queue: Arc<PlanQueue>) -> Self {
        Self { queue }
    }

    pub fn get_status(&self, job_id: &str) -> Result<JobStatus, PlanError> {
        let record = self.queue.get_status(job_id)?;
        Ok(JobStatus {
            job_id: record.id,
            status: record.state,
            progress: record.progress,
            failed_reason: record.failed_reason,
            processed_on: record.processed_on_ms,
            finished_on: record.finished_on_ms,
        })
    }
}
