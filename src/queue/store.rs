//! Durable job store.

use crate::error::StorageError;
use crate::repository::now_millis;

use super::job::{JobRecord, JobState, RetentionPolicy};

fn sled_error(context: &str, err: sled::Error) -> StorageError {
    StorageError::IoError(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("{}: {}", context, err),
    ))
}

/// Sled-backed persistence for job records. Survives restarts, which is
/// what lets the queue recover waiting work after a crash.
pub struct JobStore {
    jobs: sled::Tree,
}

impl JobStore {
    pub fn open(db: &sled::Db) -> Result<Self, StorageError> {
        Ok(Self {
            jobs: db
                .open_tree("jobs")
                .map_err(|e| sled_error("open jobs tree", e))?,
        })
    }

    pub fn get(&self, job_id: &str) -> Result<Option<JobRecord>, StorageError> {
        match self
            .jobs
            .get(job_id.as_bytes())
            .map_err(|e| sled_error("get job", e))?
        {
            Some(bytes) => {
                let record = bincode::deserialize(&bytes)
                    .map_err(|e| StorageError::InvalidRecord(format!("job decode failed: {}", e)))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub fn put(&self, record: &JobRecord) -> Result<(), StorageError> {
        let bytes = bincode::serialize(record)
            .map_err(|e| StorageError::InvalidRecord(format!("job encode failed: {}", e)))?;
        self.jobs
            .insert(record.id.as_bytes(), bytes)
            .map_err(|e| sled_error("put job", e))?;
        Ok(())
    }

    pub fn delete(&self, job_id: &str) -> Result<(), StorageError> {
        self.jobs
            .remove(job_id.as_bytes())
            .map_err(|e| sled_error("delete job", e))?;
        Ok(())
    }

    pub fn update<F>(&self, job_id: &str, mutate: F) -> Result<JobRecord, StorageError>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut record = self
            .get(job_id)?
            .ok_or_else(|| StorageError::InvalidRecord(format!("job missing: {}", job_id)))?;
        mutate(&mut record);
        self.put(&record)?;
        Ok(record)
    }

    /// Raise job progress. Writes are clamped so progress never
    /// decreases within an attempt; a stale lower value is dropped.
    pub fn raise_progress(&self, job_id: &str, percent: u8) -> Result<(), StorageError> {
        self.update(job_id, |record| {
            if percent > record.progress {
                record.progress = percent.min(100);
            }
        })?;
        Ok(())
    }

    pub fn all(&self) -> Result<Vec<JobRecord>, StorageError> {
        let mut records = Vec::new();
        for entry in self.jobs.iter() {
            let (_, bytes) = entry.map_err(|e| sled_error("scan jobs", e))?;
            let record: JobRecord = bincode::deserialize(&bytes)
                .map_err(|e| StorageError::InvalidRecord(format!("job decode failed: {}", e)))?;
            records.push(record);
        }
        Ok(records)
    }

    /// Jobs that should re-enter the pending queue on startup: waiting
    /// jobs, plus active jobs abandoned by a dead worker (reset to
    /// waiting). Returned oldest first.
    pub fn recoverable(&self) -> Result<Vec<JobRecord>, StorageError> {
        let mut recovered = Vec::new();
        for mut record in self.all()? {
            match record.state {
                JobState::Waiting => recovered.push(record),
                JobState::Active => {
                    record.state = JobState::Waiting;
                    record.progress = 0;
                    self.put(&record)?;
                    recovered.push(record);
                }
                _ => {}
            }
        }
        recovered.sort_by_key(|record| record.created_at_ms);
        Ok(recovered)
    }

    /// Drop finished jobs beyond the retention bounds. Returns how many
    /// were pruned.
    pub fn prune(&self, policy: &RetentionPolicy) -> Result<usize, StorageError> {
        let now = now_millis();
        let mut pruned = 0;
        pruned += self.prune_state(JobState::Completed, policy.completed_count, policy.completed_age_ms, now)?;
        pruned += self.prune_state(JobState::Failed, policy.failed_count, policy.failed_age_ms, now)?;
        Ok(pruned)
    }

    fn prune_state(
        &self,
        state: JobState,
        keep_count: usize,
        max_age_ms: u64,
        now: u64,
    ) -> Result<usize, StorageError> {
        let mut finished: Vec<JobRecord> = self
            .all()?
            .into_iter()
            .filter(|record| record.state == state)
            .collect();
        // Newest first; retention keeps the most recent.
        finished.sort_by_key(|record| std::cmp::Reverse(record.finished_on_ms.unwrap_or(0)));

        let mut pruned = 0;
        for (index, record) in finished.iter().enumerate() {
            let finished_on = record.finished_on_ms.unwrap_or(record.created_at_ms);
            let expired = now.saturating_sub(finished_on) > max_age_ms;
            if index >= keep_count || expired {
                self.delete(&record.id)?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::job::job_id_for_plan;
    use crate::types::PlanRequest;
    use tempfile::TempDir;

    fn open_store() -> (JobStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = sled::open(dir.path().join("queue")).unwrap();
        (JobStore::open(&db).unwrap(), dir)
    }

    fn record(plan_id: &str, state: JobState, finished_on_ms: Option<u64>) -> JobRecord {
        JobRecord {
            id: job_id_for_plan(plan_id),
            request: PlanRequest {
                user_id: "u1".to_string(),
                plan_id: plan_id.to_string(),
                number_of_meals: 5,
                servings_per_meal: 2,
                min_protein_per_meal: 40,
                max_calories_per_meal: 600,
                dietary_restrictions: vec![],
                household_members: vec![],
                price_lookup_enabled: false,
                model_id: "model-a".to_string(),
                recipients: vec![],
                test_mode: true,
            },
            state,
            attempts_made: 0,
            progress: 0,
            failed_reason: None,
            created_at_ms: now_millis(),
            processed_on_ms: None,
            finished_on_ms,
        }
    }

    #[test]
    fn progress_writes_are_monotonic() {
        let (store, _dir) = open_store();
        store.put(&record("p1", JobState::Active, None)).unwrap();

        store.raise_progress("plan-p1", 40).unwrap();
        store.raise_progress("plan-p1", 20).unwrap();
        assert_eq!(store.get("plan-p1").unwrap().unwrap().progress, 40);

        store.raise_progress("plan-p1", 100).unwrap();
        assert_eq!(store.get("plan-p1").unwrap().unwrap().progress, 100);
    }

    #[test]
    fn recovery_resets_abandoned_active_jobs() {
        let (store, _dir) = open_store();
        store.put(&record("p1", JobState::Waiting, None)).unwrap();
        store.put(&record("p2", JobState::Active, None)).unwrap();
        store
            .put(&record("p3", JobState::Completed, Some(now_millis())))
            .unwrap();

        let recovered = store.recoverable().unwrap();
        let ids: Vec<&str> = recovered.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(recovered.len(), 2);
        assert!(ids.contains(&"plan-p1"));
        assert!(ids.contains(&"plan-p2"));
        assert_eq!(
            store.get("plan-p2").unwrap().unwrap().state,
            JobState::Waiting
        );
    }

    #[test]
    fn retention_keeps_recent_jobs_and_prunes_the_rest() {
        let (store, _dir) = open_store();
        let policy = RetentionPolicy {
            completed_count: 2,
            completed_age_ms: u64::MAX,
            failed_count: 500,
            failed_age_ms: u64::MAX,
        };
        for i in 0u64..4 {
            let r = record(&format!("p{}", i), JobState::Completed, Some(1000 + i));
            store.put(&r).unwrap();
        }

        let pruned = store.prune(&policy).unwrap();
        assert_eq!(pruned, 2);
        // Newest two survive.
        assert!(store.get("plan-p3").unwrap().is_some());
        assert!(store.get("plan-p2").unwrap().is_some());
        assert!(store.get("plan-p1").unwrap().is_none());
    }

    #[test]
    fn retention_prunes_by_age() {
        let (store, _dir) = open_store();
        let policy = RetentionPolicy {
            completed_count: 100,
            completed_age_ms: 1000,
            failed_count: 500,
            failed_age_ms: u64::MAX,
        };
        let mut old = record("old", JobState::Completed, Some(now_millis() - 10_000));
        old.finished_on_ms = Some(now_millis() - 10_000);
        store.put(&old).unwrap();
        let fresh = record("fresh", JobState::Completed, Some(now_millis()));
        store.put(&fresh).unwrap();

        store.prune(&policy).unwrap();
        assert!(store.get("plan-old").unwrap().is_none());
        assert!(store.get("plan-fresh").unwrap().is_some());
    }
}
