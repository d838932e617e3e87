//! Plan repository.
//!
//! The persistent store behind the pipeline is an external collaborator
//! with an opaque schema; this module defines the CRUD contract the
//! pipeline needs and ships two implementations of it: an in-memory one
//! and a sled-backed one. Production and test code share the same
//! trait, so nothing in the pipeline knows which it is talking to.

pub mod memory;
pub mod persistence;

pub use memory::MemoryPlanRepository;
pub use persistence::SledPlanRepository;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::shopping::CategorizedShoppingList;
use crate::types::{GeneratedMeal, PlanStatus, SchedulePolicy, UserProfile};

static PLAN_COUNTER: AtomicU64 = AtomicU64::new(1);

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a unique plan id. Uniqueness per (user, week) is enforced by
/// the scheduler's existing-plan check, not by the id itself, because a
/// failed week may legitimately get a fresh plan.
pub fn new_plan_id() -> String {
    let ts = now_millis();
    let pid = std::process::id();
    let seq = PLAN_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("mp-{ts}-{pid}-{seq}")
}

/// Persisted state of one weekly plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRecord {
    pub plan_id: String,
    pub user_id: String,
    pub week_start: NaiveDate,
    pub status: PlanStatus,
    pub model_id: String,
    #[serde(default)]
    pub job_id: Option<String>,
    pub created_at_ms: u64,
    #[serde(default)]
    pub job_started_at_ms: Option<u64>,
    #[serde(default)]
    pub job_completed_at_ms: Option<u64>,
    #[serde(default)]
    pub job_error: Option<String>,
    #[serde(default)]
    pub email_sent: bool,
    #[serde(default)]
    pub iteration_count: u32,
    #[serde(default)]
    pub shopping_list: Option<CategorizedShoppingList>,
}

/// Successful generation output persisted onto the plan record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanCompletion {
    pub email_sent: bool,
    pub iteration_count: u32,
    pub shopping_list: CategorizedShoppingList,
}

/// One generated meal kept for history and variety hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealRecord {
    pub user_id: String,
    pub plan_id: String,
    pub recorded_at_ms: u64,
    pub meal: GeneratedMeal,
}

/// CRUD contract between the pipeline and the persistent store.
#[async_trait]
pub trait PlanRepository: Send + Sync {
    /// Create a new plan in `Pending` state for the given week.
    async fn create_plan(
        &self,
        user_id: &str,
        week_start: NaiveDate,
        model_id: &str,
    ) -> Result<PlanRecord, StorageError>;

    async fn get_plan(&self, plan_id: &str) -> Result<Option<PlanRecord>, StorageError>;

    /// Find a plan for (user, week) whose status blocks creating a new
    /// one (pending, processing or completed). Failed plans are ignored.
    async fn find_blocking_plan_for_week(
        &self,
        user_id: &str,
        week_start: NaiveDate,
    ) -> Result<Option<PlanRecord>, StorageError>;

    async fn set_plan_job(&self, plan_id: &str, job_id: &str) -> Result<(), StorageError>;

    /// `pending -> processing`, stamping the start time.
    async fn mark_plan_processing(&self, plan_id: &str) -> Result<(), StorageError>;

    /// `processing -> completed`, storing the generation output.
    async fn complete_plan(
        &self,
        plan_id: &str,
        completion: &PlanCompletion,
    ) -> Result<(), StorageError>;

    /// Terminal failure, stamping the completion time and error message.
    async fn fail_plan(&self, plan_id: &str, job_error: &str) -> Result<(), StorageError>;

    async fn record_meals(
        &self,
        user_id: &str,
        plan_id: &str,
        meals: &[GeneratedMeal],
    ) -> Result<(), StorageError>;

    /// Most recent distinct meal names for a user, newest first.
    async fn recent_meal_names(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<String>, StorageError>;

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StorageError>;

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), StorageError>;

    /// Schedule policies for every known user, disabled ones included.
    async fn list_schedule_policies(&self) -> Result<Vec<SchedulePolicy>, StorageError>;
}

/// Deduplicate meal names preserving order (newest first input).
pub(crate) fn distinct_names(names: impl IntoIterator<Item = String>, limit: usize) -> Vec<String> {
    let mut seen = Vec::new();
    for name in names {
        if seen.len() >= limit {
            break;
        }
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_ids_are_unique() {
        let a = new_plan_id();
        let b = new_plan_id();
        assert_ne!(a, b);
    }

    #[test]
    fn distinct_names_preserves_order_and_limit() {
        let names = vec![
            "Chicken curry".to_string(),
            "Beef tacos".to_string(),
            "Chicken curry".to_string(),
            "Salmon bowls".to_string(),
        ];
        assert_eq!(
            distinct_names(names.clone(), 4),
            vec!["Chicken curry", "Beef tacos", "Salmon bowls"]
        );
        assert_eq!(distinct_names(names, 2), vec!["Chicken curry", "Beef tacos"]);
    }
}
