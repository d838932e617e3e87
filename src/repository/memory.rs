//! In-memory repository implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;

use super::{
    distinct_names, new_plan_id, now_millis, MealRecord, PlanCompletion, PlanRecord,
    PlanRepository,
};
use crate::error::StorageError;
use crate::types::{GeneratedMeal, PlanStatus, SchedulePolicy, UserProfile};

/// Repository backed by process memory. Shares the `PlanRepository`
/// contract with the sled implementation; state is lost on drop.
#[derive(Default)]
pub struct MemoryPlanRepository {
    plans: RwLock<HashMap<String, PlanRecord>>,
    meals: RwLock<Vec<MealRecord>>,
    profiles: RwLock<HashMap<String, UserProfile>>,
}

impl MemoryPlanRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored plan records, across all states.
    pub fn plan_count(&self) -> usize {
        self.plans.read().len()
    }
}

#[async_trait]
impl PlanRepository for MemoryPlanRepository {
    async fn create_plan(
        &self,
        user_id: &str,
        week_start: NaiveDate,
        model_id: &str,
    ) -> Result<PlanRecord, StorageError> {
        let record = PlanRecord {
            plan_id: new_plan_id(),
            user_id: user_id.to_string(),
            week_start,
            status: PlanStatus::Pending,
            model_id: model_id.to_string(),
            job_id: None,
            created_at_ms: now_millis(),
            job_started_at_ms: None,
            job_completed_at_ms: None,
            job_error: None,
            email_sent: false,
            iteration_count: 0,
            shopping_list: None,
        };
        self.plans
            .write()
            .insert(record.plan_id.clone(), record.clone());
        Ok(record)
    }

    async fn get_plan(&self, plan_id: &str) -> Result<Option<PlanRecord>, StorageError> {
        Ok(self.plans.read().get(plan_id).cloned())
    }

    async fn find_blocking_plan_for_week(
        &self,
        user_id: &str,
        week_start: NaiveDate,
    ) -> Result<Option<PlanRecord>, StorageError> {
        Ok(self
            .plans
            .read()
            .values()
            .filter(|plan| {
                plan.user_id == user_id
                    && plan.week_start == week_start
                    && plan.status.blocks_new_plan()
            })
            .max_by_key(|plan| plan.created_at_ms)
            .cloned())
    }

    async fn set_plan_job(&self, plan_id: &str, job_id: &str) -> Result<(), StorageError> {
        let mut plans = self.plans.write();
        let plan = plans
            .get_mut(plan_id)
            .ok_or_else(|| StorageError::PlanNotFound(plan_id.to_string()))?;
        plan.job_id = Some(job_id.to_string());
        Ok(())
    }

    async fn mark_plan_processing(&self, plan_id: &str) -> Result<(), StorageError> {
        let mut plans = self.plans.write();
        let plan = plans
            .get_mut(plan_id)
            .ok_or_else(|| StorageError::PlanNotFound(plan_id.to_string()))?;
        plan.status = PlanStatus::Processing;
        plan.job_started_at_ms = Some(now_millis());
        Ok(())
    }

    async fn complete_plan(
        &self,
        plan_id: &str,
        completion: &PlanCompletion,
    ) -> Result<(), StorageError> {
        let mut plans = self.plans.write();
        let plan = plans
            .get_mut(plan_id)
            .ok_or_else(|| StorageError::PlanNotFound(plan_id.to_string()))?;
        plan.status = PlanStatus::Completed;
        plan.job_completed_at_ms = Some(now_millis());
        plan.email_sent = completion.email_sent;
        plan.iteration_count = completion.iteration_count;
        plan.shopping_list = Some(completion.shopping_list.clone());
        Ok(())
    }

    async fn fail_plan(&self, plan_id: &str, job_error: &str) -> Result<(), StorageError> {
        let mut plans = self.plans.write();
        let plan = plans
            .get_mut(plan_id)
            .ok_or_else(|| StorageError::PlanNotFound(plan_id.to_string()))?;
        plan.status = PlanStatus::Failed;
        plan.job_completed_at_ms = Some(now_millis());
        plan.job_error = Some(job_error.to_string());
        Ok(())
    }

    async fn record_meals(
        &self,
        user_id: &str,
        plan_id: &str,
        meals: &[GeneratedMeal],
    ) -> Result<(), StorageError> {
        let recorded_at_ms = now_millis();
        let mut store = self.meals.write();
        for meal in meals {
            store.push(MealRecord {
                user_id: user_id.to_string(),
                plan_id: plan_id.to_string(),
                recorded_at_ms,
                meal: meal.clone(),
            });
        }
        Ok(())
    }

    async fn recent_meal_names(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<String>, StorageError> {
        let meals = self.meals.read();
        let newest_first = meals
            .iter()
            .rev()
            .filter(|record| record.user_id == user_id)
            .map(|record| record.meal.name.clone());
        Ok(distinct_names(newest_first, limit))
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StorageError> {
        Ok(self.profiles.read().get(user_id).cloned())
    }

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), StorageError> {
        self.profiles
            .write()
            .insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }

    async fn list_schedule_policies(&self) -> Result<Vec<SchedulePolicy>, StorageError> {
        let mut policies: Vec<SchedulePolicy> = self
            .profiles
            .read()
            .values()
            .map(|profile| profile.schedule.clone())
            .collect();
        policies.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(policies)
    }
}
