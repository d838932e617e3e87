//! Plan Generation Queue
//!
//! Durable, retryable work queue for meal plan generation. Jobs are
//! identified deterministically from their plan id, so enqueueing is
//! idempotent. A bounded worker pool processes jobs under a
//! sliding-window admission limiter, with exponential-backoff retries
//! and bounded retention of finished jobs.

pub mod job;
pub mod limiter;
pub mod store;

pub use job::{job_id_for_plan, JobRecord, JobState, QueueConfig, RetentionPolicy, RetryPolicy};
pub use limiter::AdmissionLimiter;
pub use store::JobStore;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::{PlanError, StorageError};
use crate::lookup::ProductLookup;
use crate::mail::EmailSender;
use crate::orchestrator::PlanOrchestrator;
use crate::progress::{ProgressSink, ScaledSink};
use crate::provider::ClientFactory;
use crate::repository::{now_millis, PlanCompletion, PlanRepository};
use crate::types::PlanRequest;

/// Queue statistics
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// External capabilities the worker needs to run one job.
pub struct WorkerDeps {
    pub repository: Arc<dyn PlanRepository>,
    pub providers: Arc<dyn ClientFactory>,
    pub mailer: Arc<dyn EmailSender>,
    pub lookup: Arc<dyn ProductLookup>,
}

/// Progress sink bound to one job record. Writes are best-effort and
/// monotonic; the store drops stale lower values.
struct JobProgressSink<'a> {
    store: &'a JobStore,
    job_id: &'a str,
}

impl ProgressSink for JobProgressSink<'_> {
    fn report(&self, percent: u8, message: &str) {
        debug!(job_id = %self.job_id, percent, message, "job progress");
        if let Err(err) = self.store.raise_progress(self.job_id, percent) {
            warn!(job_id = %self.job_id, error = %err, "failed to record job progress");
        }
    }
}

/// Meal plan generation queue.
pub struct PlanQueue {
    store: JobStore,
    /// FIFO of job ids awaiting a worker.
    pending: Mutex<VecDeque<String>>,
    /// Wakes workers when new items are enqueued.
    notify: Notify,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    running: RwLock<bool>,
    stats: RwLock<QueueStats>,
    config: QueueConfig,
    limiter: AdmissionLimiter,
    deps: WorkerDeps,
}

impl PlanQueue {
    pub fn new(db: &sled::Db, config: QueueConfig, deps: WorkerDeps) -> Result<Self, StorageError> {
        let limiter = AdmissionLimiter::new(config.admission_max_starts, config.admission_window);
        Ok(Self {
            store: JobStore::open(db)?,
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            workers: Mutex::new(Vec::new()),
            running: RwLock::new(false),
            stats: RwLock::new(QueueStats::default()),
            config,
            limiter,
            deps,
        })
    }

    /// Enqueue a generation job. Idempotent: a job id is a pure function
    /// of the plan id, and an existing job (in any state) is reused
    /// rather than duplicated.
    pub fn enqueue(&self, request: PlanRequest) -> Result<String, PlanError> {
        let job_id = job_id_for_plan(&request.plan_id);

        if let Some(existing) = self.store.get(&job_id)? {
            debug!(
                job_id = %job_id,
                state = existing.state.as_str(),
                "job already exists, reusing"
            );
            return Ok(job_id);
        }

        if self.pending.lock().len() >= self.config.max_queue_size {
            warn!(
                max_size = self.config.max_queue_size,
                "generation queue is full, dropping request"
            );
            return Err(PlanError::QueueFull);
        }

        let record = JobRecord {
            id: job_id.clone(),
            request,
            state: JobState::Waiting,
            attempts_made: 0,
            progress: 0,
            failed_reason: None,
            created_at_ms: now_millis(),
            processed_on_ms: None,
            finished_on_ms: None,
        };
        self.store.put(&record)?;
        self.pending.lock().push_back(job_id.clone());
        self.stats.write().pending += 1;
        self.notify.notify_one();

        debug!(
            job_id = %job_id,
            user_id = %record.request.user_id,
            model_id = %record.request.model_id,
            "enqueued generation job"
        );
        Ok(job_id)
    }

    pub fn get_status(&self, job_id: &str) -> Result<JobRecord, PlanError> {
        self.store
            .get(job_id)?
            .ok_or_else(|| PlanError::JobNotFound(job_id.to_string()))
    }

    /// Cancel a job that no worker has picked up yet. Does not interrupt
    /// an in-flight generation call.
    pub fn cancel(&self, job_id: &str) -> Result<(), PlanError> {
        if self.store.get(job_id)?.is_none() {
            return Err(PlanError::JobNotFound(job_id.to_string()));
        }

        let removed = {
            let mut pending = self.pending.lock();
            match pending.iter().position(|id| id == job_id) {
                Some(position) => {
                    pending.remove(position);
                    true
                }
                None => false,
            }
        };
        if !removed {
            return Err(PlanError::JobNotCancelable(job_id.to_string()));
        }

        self.store.delete(job_id)?;
        let mut stats = self.stats.write();
        stats.pending = stats.pending.saturating_sub(1);
        info!(job_id = %job_id, "cancelled queued job");
        Ok(())
    }

    /// Rebuild the pending queue from the durable store: waiting jobs,
    /// plus active jobs abandoned by a previous process. Call before
    /// `start`.
    pub fn recover(&self) -> Result<usize, PlanError> {
        let recovered = self.store.recoverable()?;
        let count = recovered.len();
        {
            let mut pending = self.pending.lock();
            pending.clear();
            for record in &recovered {
                pending.push_back(record.id.clone());
            }
        }
        self.stats.write().pending = count;
        for _ in 0..count.min(self.config.workers.max(1)) {
            self.notify.notify_one();
        }
        if count > 0 {
            info!(count, "recovered jobs into the pending queue");
        }
        Ok(count)
    }

    /// Start background workers.
    pub fn start(self: &Arc<Self>) {
        {
            let mut running = self.running.write();
            if *running {
                return;
            }
            *running = true;
        }

        let mut workers = self.workers.lock();
        for worker_id in 0..self.config.workers.max(1) {
            let queue = Arc::clone(self);
            workers.push(tokio::spawn(async move {
                queue.worker_loop(worker_id).await;
            }));
        }
        info!(worker_count = workers.len(), "started generation queue workers");
    }

    /// Stop background workers (graceful shutdown). In-flight jobs run
    /// to the end of their current attempt.
    pub async fn stop(&self) {
        {
            let mut running = self.running.write();
            if !*running {
                return;
            }
            *running = false;
        }
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            let _ = handle.await;
        }
        info!("stopped generation queue workers");
    }

    pub fn stats(&self) -> QueueStats {
        self.stats.read().clone()
    }

    /// Poll until the job reaches a terminal state.
    pub async fn wait_for_terminal(
        &self,
        job_id: &str,
        timeout: Option<Duration>,
    ) -> Result<JobRecord, PlanError> {
        let start = Instant::now();
        loop {
            let record = self.get_status(job_id)?;
            if record.state.is_terminal() {
                return Ok(record);
            }
            if let Some(timeout) = timeout {
                if start.elapsed() >= timeout {
                    return Err(PlanError::ConfigError(
                        "timeout waiting for job completion".to_string(),
                    ));
                }
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        debug!(worker_id, "worker started");

        while *self.running.read() {
            let job_id = self.pending.lock().pop_front();
            let Some(job_id) = job_id else {
                // Idle: wait for a wakeup, with a timeout so the running
                // flag is rechecked periodically.
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = sleep(Duration::from_millis(100)) => {}
                }
                continue;
            };

            {
                let mut stats = self.stats.write();
                stats.pending = stats.pending.saturating_sub(1);
                stats.processing += 1;
            }

            // Admission gate: bounds job starts per sliding window.
            self.limiter.admit().await;
            self.process(&job_id, worker_id).await;
        }

        debug!(worker_id, "worker stopped");
    }

    async fn process(&self, job_id: &str, worker_id: usize) {
        let record = match self.store.update(job_id, |record| {
            record.state = JobState::Active;
            record.attempts_made += 1;
            record.processed_on_ms = Some(now_millis());
            // Monotonicity is per attempt; a retry starts the band over.
            record.progress = 0;
        }) {
            Ok(record) => record,
            Err(err) => {
                warn!(worker_id, job_id = %job_id, error = %err, "failed to claim job");
                let mut stats = self.stats.write();
                stats.processing = stats.processing.saturating_sub(1);
                return;
            }
        };

        let attempt = record.attempts_made;
        info!(
            worker_id,
            job_id = %job_id,
            user_id = %record.request.user_id,
            plan_id = %record.request.plan_id,
            attempt,
            "processing generation job"
        );

        let started = Instant::now();
        let result = self.run_attempt(&record).await;

        match result {
            Ok(()) => {
                let update = self.store.update(job_id, |record| {
                    record.state = JobState::Completed;
                    record.progress = 100;
                    record.finished_on_ms = Some(now_millis());
                });
                if let Err(err) = update {
                    warn!(job_id = %job_id, error = %err, "failed to finalize job record");
                }
                {
                    let mut stats = self.stats.write();
                    stats.processing = stats.processing.saturating_sub(1);
                    stats.completed += 1;
                }
                if let Err(err) = self.store.prune(&self.config.retention) {
                    warn!(error = %err, "retention pruning failed");
                }
                info!(
                    worker_id,
                    job_id = %job_id,
                    attempt,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "generation job completed"
                );
            }
            Err(err) => {
                let reason = err.to_string();
                let retry = attempt < self.config.retry.max_attempts && err.is_retryable();
                {
                    let mut stats = self.stats.write();
                    stats.processing = stats.processing.saturating_sub(1);
                }

                if retry {
                    let update = self.store.update(job_id, |record| {
                        record.state = JobState::Waiting;
                        record.failed_reason = Some(reason.clone());
                    });
                    if let Err(err) = update {
                        warn!(job_id = %job_id, error = %err, "failed to requeue job record");
                        return;
                    }
                    let delay = self.config.retry.backoff_delay(attempt);
                    warn!(
                        worker_id,
                        job_id = %job_id,
                        attempt,
                        error = %reason,
                        retry_in_ms = delay.as_millis() as u64,
                        "attempt failed, retrying after backoff"
                    );
                    sleep(delay).await;
                    self.pending.lock().push_back(job_id.to_string());
                    self.stats.write().pending += 1;
                    self.notify.notify_one();
                } else {
                    let update = self.store.update(job_id, |record| {
                        record.state = JobState::Failed;
                        record.failed_reason = Some(reason.clone());
                        record.finished_on_ms = Some(now_millis());
                    });
                    if let Err(err) = update {
                        warn!(job_id = %job_id, error = %err, "failed to finalize job record");
                    }
                    self.stats.write().failed += 1;

                    // The plan leaves its non-terminal state only now,
                    // after the final attempt is exhausted.
                    if let Err(err) = self
                        .deps
                        .repository
                        .fail_plan(&record.request.plan_id, &reason)
                        .await
                    {
                        error!(
                            plan_id = %record.request.plan_id,
                            error = %err,
                            "failed to mark plan as failed"
                        );
                    }
                    if let Err(err) = self.store.prune(&self.config.retention) {
                        warn!(error = %err, "retention pruning failed");
                    }
                    error!(
                        worker_id,
                        job_id = %job_id,
                        attempt,
                        error = %reason,
                        "generation job failed permanently"
                    );
                }
            }
        }
    }

    /// One attempt: setup [0,20), orchestrator scaled into [20,90],
    /// persistence [90,100]. Errors propagate so the queue's retry
    /// policy governs whether another attempt happens.
    async fn run_attempt(&self, record: &JobRecord) -> Result<(), PlanError> {
        let request = &record.request;
        let sink = JobProgressSink {
            store: &self.store,
            job_id: &record.id,
        };

        sink.report(5, "Preparing generation request");
        self.deps
            .repository
            .mark_plan_processing(&request.plan_id)
            .await?;

        let client = self.deps.providers.create_client(&request.model_id)?;
        sink.report(15, "Provider client ready");

        let orchestrator = PlanOrchestrator::new(
            client,
            Arc::clone(&self.deps.repository),
            Arc::clone(&self.deps.mailer),
            Arc::clone(&self.deps.lookup),
        );
        let scaled = ScaledSink::new(&sink, 20, 90);
        let outcome = orchestrator.generate(request, &scaled).await?;

        sink.report(90, "Persisting results");
        self.deps
            .repository
            .record_meals(&request.user_id, &request.plan_id, &outcome.meals)
            .await?;
        self.deps
            .repository
            .complete_plan(
                &request.plan_id,
                &PlanCompletion {
                    email_sent: outcome.email_sent,
                    iteration_count: outcome.iteration_count,
                    shopping_list: outcome.shopping_list,
                },
            )
            .await?;
        Ok(())
    }
}
