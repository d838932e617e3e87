//! Recurring plan scheduling.
//!
//! Each enabled schedule policy becomes a trigger task that fires at
//! its weekly minute/hour/day slot. Firings are funneled through one
//! serialized tick processor: it computes the target week, skips when a
//! plan already exists (a benign no-op, not an error), and otherwise
//! creates a pending plan record and enqueues the generation job.

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{PlanError, StorageError};
use crate::queue::PlanQueue;
use crate::repository::PlanRepository;
use crate::types::{next_week_start, PlanRequest, SchedulePolicy, UserProfile};

/// A recurring weekly trigger slot, kept independent of any scheduler
/// backend's native trigger syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSpec {
    pub minute: u8,
    pub hour: u8,
    /// 0 = Sunday .. 6 = Saturday
    pub day_of_week: u8,
}

impl From<&SchedulePolicy> for ScheduleSpec {
    fn from(policy: &SchedulePolicy) -> Self {
        Self {
            minute: policy.minute,
            hour: policy.hour,
            day_of_week: policy.day_of_week,
        }
    }
}

impl ScheduleSpec {
    /// Translate to the next firing instant strictly after `after`.
    pub fn next_occurrence(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        for day_offset in 0..=7u64 {
            let date: NaiveDate = after.date_naive() + chrono::Days::new(day_offset);
            if date.weekday().num_days_from_sunday() != self.day_of_week as u32 {
                continue;
            }
            let Some(naive) = date.and_hms_opt(self.hour as u32, self.minute as u32, 0) else {
                continue;
            };
            let candidate = Utc.from_utc_datetime(&naive);
            if candidate > after {
                return candidate;
            }
        }
        // Unreachable for valid specs: a weekly slot always lands within
        // the next 8 days. Fall back one week out.
        after + chrono::Duration::days(7)
    }

    /// Cron rendering, for display only.
    pub fn cron_expression(&self) -> String {
        format!("{} {} * * {}", self.minute, self.hour, self.day_of_week)
    }
}

/// What a single trigger firing did.
#[derive(Debug)]
pub enum ScheduleOutcome {
    Enqueued {
        plan_id: String,
        job_id: String,
        week_start: NaiveDate,
    },
    /// A plan already exists for the target week, or the policy is
    /// disabled. Not an error.
    Skipped { reason: String },
}

/// Per-user recurring trigger manager.
pub struct Scheduler {
    repository: Arc<dyn PlanRepository>,
    queue: Arc<PlanQueue>,
    default_model: String,
    triggers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    tick_tx: mpsc::Sender<String>,
}

impl Scheduler {
    /// Create the scheduler and spawn its serialized tick processor.
    /// Tick processing is intentionally single-consumer: trigger
    /// firings across all users are handled one at a time.
    pub fn new(
        repository: Arc<dyn PlanRepository>,
        queue: Arc<PlanQueue>,
        default_model: impl Into<String>,
    ) -> Arc<Self> {
        let (tick_tx, mut tick_rx) = mpsc::channel::<String>(64);
        let scheduler = Arc::new(Self {
            repository,
            queue,
            default_model: default_model.into(),
            triggers: Mutex::new(Vec::new()),
            tick_tx,
        });

        // Weak reference: the consumer must not keep the scheduler (and
        // its sender) alive after every other handle is gone.
        let consumer = Arc::downgrade(&scheduler);
        tokio::spawn(async move {
            while let Some(user_id) = tick_rx.recv().await {
                let Some(scheduler) = consumer.upgrade() else {
                    return;
                };
                match scheduler.process_tick(&user_id).await {
                    Ok(ScheduleOutcome::Enqueued {
                        plan_id,
                        job_id,
                        week_start,
                    }) => {
                        info!(
                            user_id = %user_id,
                            plan_id = %plan_id,
                            job_id = %job_id,
                            week_start = %week_start,
                            "scheduled generation enqueued"
                        );
                    }
                    Ok(ScheduleOutcome::Skipped { reason }) => {
                        info!(user_id = %user_id, reason = %reason, "scheduled firing skipped");
                    }
                    Err(err) => {
                        error!(user_id = %user_id, error = %err, "scheduled firing failed");
                    }
                }
            }
        });

        scheduler
    }

    /// Tear down every registered trigger and rebuild from the current
    /// policy set. Stale triggers never persist past a resync. Returns
    /// the number of triggers registered.
    pub async fn resync(self: &Arc<Self>) -> Result<usize, PlanError> {
        let policies = self.repository.list_schedule_policies().await?;

        {
            let mut triggers = self.triggers.lock();
            for handle in triggers.drain(..) {
                handle.abort();
            }
        }

        let mut registered = 0;
        let mut triggers = self.triggers.lock();
        for policy in &policies {
            if !policy.enabled {
                debug!(user_id = %policy.user_id, "skipping disabled schedule");
                continue;
            }
            triggers.push(self.spawn_trigger(policy));
            registered += 1;
        }
        info!(
            registered,
            disabled = policies.len() - registered,
            "schedule resync complete"
        );
        Ok(registered)
    }

    /// Abort all triggers (shutdown path).
    pub fn shutdown(&self) {
        let mut triggers = self.triggers.lock();
        for handle in triggers.drain(..) {
            handle.abort();
        }
    }

    pub fn registered_triggers(&self) -> usize {
        self.triggers.lock().len()
    }

    fn spawn_trigger(self: &Arc<Self>, policy: &SchedulePolicy) -> tokio::task::JoinHandle<()> {
        let spec = ScheduleSpec::from(policy);
        let user_id = policy.user_id.clone();
        let tick_tx = self.tick_tx.clone();
        debug!(
            user_id = %user_id,
            trigger = %spec.cron_expression(),
            "registered schedule trigger"
        );
        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let next = spec.next_occurrence(now);
                let delay = (next - now)
                    .to_std()
                    .unwrap_or_else(|_| std::time::Duration::from_secs(1));
                tokio::time::sleep(delay).await;
                if tick_tx.send(user_id.clone()).await.is_err() {
                    // Tick consumer is gone; nothing left to trigger.
                    return;
                }
            }
        })
    }

    /// Handle one trigger firing for a user. Public so the on-demand
    /// path and tests can drive it without waiting for wall-clock time.
    pub async fn process_tick(&self, user_id: &str) -> Result<ScheduleOutcome, PlanError> {
        let profile = self
            .repository
            .get_profile(user_id)
            .await?
            .ok_or_else(|| StorageError::ProfileNotFound(user_id.to_string()))?;

        if !profile.schedule.enabled {
            return Ok(ScheduleOutcome::Skipped {
                reason: "scheduling disabled".to_string(),
            });
        }

        self.create_and_enqueue(&profile, false).await
    }

    /// On-demand generation: bypasses the trigger machinery (and the
    /// enabled check) but reuses the same plan-exists check and
    /// enqueue path.
    pub async fn enqueue_now(
        &self,
        user_id: &str,
        test_mode: bool,
    ) -> Result<ScheduleOutcome, PlanError> {
        let profile = self
            .repository
            .get_profile(user_id)
            .await?
            .ok_or_else(|| StorageError::ProfileNotFound(user_id.to_string()))?;
        self.create_and_enqueue(&profile, test_mode).await
    }

    async fn create_and_enqueue(
        &self,
        profile: &UserProfile,
        test_mode: bool,
    ) -> Result<ScheduleOutcome, PlanError> {
        let user_id = profile.user_id.as_str();
        let week_start = next_week_start(Utc::now().date_naive());

        if let Some(existing) = self
            .repository
            .find_blocking_plan_for_week(user_id, week_start)
            .await?
        {
            return Ok(ScheduleOutcome::Skipped {
                reason: format!(
                    "plan {} already exists for week starting {}",
                    existing.plan_id, week_start
                ),
            });
        }

        let plan = self
            .repository
            .create_plan(user_id, week_start, &self.default_model)
            .await?;
        debug!(
            user_id = %user_id,
            plan_id = %plan.plan_id,
            week_start = %week_start,
            "created pending plan"
        );

        let request = build_plan_request(profile, &plan.plan_id, &self.default_model, test_mode);
        let job_id = self.queue.enqueue(request)?;
        if let Err(err) = self.repository.set_plan_job(&plan.plan_id, &job_id).await {
            warn!(plan_id = %plan.plan_id, error = %err, "failed to link plan to job");
        }

        Ok(ScheduleOutcome::Enqueued {
            plan_id: plan.plan_id,
            job_id,
            week_start,
        })
    }
}

/// Assemble the immutable job request from a stored profile.
pub fn build_plan_request(
    profile: &UserProfile,
    plan_id: &str,
    model_id: &str,
    test_mode: bool,
) -> PlanRequest {
    PlanRequest {
        user_id: profile.user_id.clone(),
        plan_id: plan_id.to_string(),
        number_of_meals: profile.preferences.number_of_meals,
        servings_per_meal: profile.preferences.servings_per_meal,
        min_protein_per_meal: profile.preferences.min_protein_per_meal,
        max_calories_per_meal: profile.preferences.max_calories_per_meal,
        dietary_restrictions: profile.preferences.dietary_restrictions.clone(),
        household_members: profile.household_members.clone(),
        price_lookup_enabled: profile.price_lookup_enabled,
        model_id: model_id.to_string(),
        recipients: profile.effective_recipients(),
        test_mode,
    }
}
