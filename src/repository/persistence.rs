//! Sled-backed repository implementation.

use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDate;

use super::{
    distinct_names, new_plan_id, now_millis, MealRecord, PlanCompletion, PlanRecord,
    PlanRepository,
};
use crate::error::StorageError;
use crate::types::{GeneratedMeal, PlanStatus, SchedulePolicy, UserProfile};

fn sled_error(context: &str, err: sled::Error) -> StorageError {
    StorageError::IoError(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("{}: {}", context, err),
    ))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(value)
        .map_err(|e| StorageError::InvalidRecord(format!("serialize failed: {}", e)))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    bincode::deserialize(bytes)
        .map_err(|e| StorageError::InvalidRecord(format!("deserialize failed: {}", e)))
}

/// Repository stored in a sled database.
///
/// Trees: `plans` (plan_id -> PlanRecord), `plan_weeks`
/// ("user|week" -> Vec<plan_id>), `meals`
/// ("user|recorded_at|seq" -> MealRecord), `profiles`
/// (user_id -> UserProfile).
pub struct SledPlanRepository {
    plans: sled::Tree,
    plan_weeks: sled::Tree,
    meals: sled::Tree,
    profiles: sled::Tree,
    meal_seq: std::sync::atomic::AtomicU64,
}

impl SledPlanRepository {
    pub fn open(db: &sled::Db) -> Result<Self, StorageError> {
        Ok(Self {
            plans: db
                .open_tree("plans")
                .map_err(|e| sled_error("open plans tree", e))?,
            plan_weeks: db
                .open_tree("plan_weeks")
                .map_err(|e| sled_error("open plan_weeks tree", e))?,
            meals: db
                .open_tree("meals")
                .map_err(|e| sled_error("open meals tree", e))?,
            profiles: db
                .open_tree("profiles")
                .map_err(|e| sled_error("open profiles tree", e))?,
            meal_seq: std::sync::atomic::AtomicU64::new(0),
        })
    }

    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| sled_error("open database", e))?;
        Self::open(&db)
    }

    fn week_key(user_id: &str, week_start: NaiveDate) -> String {
        format!("{}|{}", user_id, week_start)
    }

    fn load_plan(&self, plan_id: &str) -> Result<Option<PlanRecord>, StorageError> {
        match self
            .plans
            .get(plan_id.as_bytes())
            .map_err(|e| sled_error("get plan", e))?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn store_plan(&self, record: &PlanRecord) -> Result<(), StorageError> {
        self.plans
            .insert(record.plan_id.as_bytes(), encode(record)?)
            .map_err(|e| sled_error("put plan", e))?;
        Ok(())
    }

    fn update_plan<F>(&self, plan_id: &str, mutate: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut PlanRecord),
    {
        let mut record = self
            .load_plan(plan_id)?
            .ok_or_else(|| StorageError::PlanNotFound(plan_id.to_string()))?;
        mutate(&mut record);
        self.store_plan(&record)
    }
}

#[async_trait]
impl PlanRepository for SledPlanRepository {
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
        self.store_plan(&record)?;

        // Maintain the (user, week) -> plan ids index.
        let key = Self::week_key(user_id, week_start);
        let mut ids: Vec<String> = match self
            .plan_weeks
            .get(key.as_bytes())
            .map_err(|e| sled_error("get week index", e))?
        {
            Some(bytes) => decode(&bytes)?,
            None => Vec::new(),
        };
        ids.push(record.plan_id.clone());
        self.plan_weeks
            .insert(key.as_bytes(), encode(&ids)?)
            .map_err(|e| sled_error("put week index", e))?;

        Ok(record)
    }

    async fn get_plan(&self, plan_id: &str) -> Result<Option<PlanRecord>, StorageError> {
        self.load_plan(plan_id)
    }

    async fn find_blocking_plan_for_week(
        &self,
        user_id: &str,
        week_start: NaiveDate,
    ) -> Result<Option<PlanRecord>, StorageError> {
        let key = Self::week_key(user_id, week_start);
        let ids: Vec<String> = match self
            .plan_weeks
            .get(key.as_bytes())
            .map_err(|e| sled_error("get week index", e))?
        {
            Some(bytes) => decode(&bytes)?,
            None => return Ok(None),
        };

        let mut newest: Option<PlanRecord> = None;
        for id in ids {
            if let Some(record) = self.load_plan(&id)? {
                if record.status.blocks_new_plan()
                    && newest
                        .as_ref()
                        .map(|best| record.created_at_ms > best.created_at_ms)
                        .unwrap_or(true)
                {
                    newest = Some(record);
                }
            }
        }
        Ok(newest)
    }

    async fn set_plan_job(&self, plan_id: &str, job_id: &str) -> Result<(), StorageError> {
        self.update_plan(plan_id, |plan| plan.job_id = Some(job_id.to_string()))
    }

    async fn mark_plan_processing(&self, plan_id: &str) -> Result<(), StorageError> {
        self.update_plan(plan_id, |plan| {
            plan.status = PlanStatus::Processing;
            plan.job_started_at_ms = Some(now_millis());
        })
    }

    async fn complete_plan(
        &self,
        plan_id: &str,
        completion: &PlanCompletion,
    ) -> Result<(), StorageError> {
        self.update_plan(plan_id, |plan| {
            plan.status = PlanStatus::Completed;
            plan.job_completed_at_ms = Some(now_millis());
            plan.email_sent = completion.email_sent;
            plan.iteration_count = completion.iteration_count;
            plan.shopping_list = Some(completion.shopping_list.clone());
        })
    }

    async fn fail_plan(&self, plan_id: &str, job_error: &str) -> Result<(), StorageError> {
        self.update_plan(plan_id, |plan| {
            plan.status = PlanStatus::Failed;
            plan.job_completed_at_ms = Some(now_millis());
            plan.job_error = Some(job_error.to_string());
        })
    }

    async fn record_meals(
        &self,
        user_id: &str,
        plan_id: &str,
        meals: &[GeneratedMeal],
    ) -> Result<(), StorageError> {
        let recorded_at_ms = now_millis();
        for meal in meals {
            let record = MealRecord {
                user_id: user_id.to_string(),
                plan_id: plan_id.to_string(),
                recorded_at_ms,
                meal: meal.clone(),
            };
            // Zero-padded timestamp plus a process-wide sequence keeps
            // lexicographic order equal to insertion order within a
            // user's prefix, even for same-millisecond writes.
            let seq = self
                .meal_seq
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let key = format!("{}|{:020}|{:06}", user_id, recorded_at_ms, seq);
            self.meals
                .insert(key.as_bytes(), encode(&record)?)
                .map_err(|e| sled_error("put meal record", e))?;
        }
        Ok(())
    }

    async fn recent_meal_names(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<String>, StorageError> {
        let prefix = format!("{}|", user_id);
        let mut names = Vec::new();
        for entry in self.meals.scan_prefix(prefix.as_bytes()) {
            let (_, bytes) = entry.map_err(|e| sled_error("scan meal records", e))?;
            let record: MealRecord = decode(&bytes)?;
            names.push(record.meal.name);
        }
        names.reverse();
        Ok(distinct_names(names, limit))
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StorageError> {
        match self
            .profiles
            .get(user_id.as_bytes())
            .map_err(|e| sled_error("get profile", e))?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), StorageError> {
        self.profiles
            .insert(profile.user_id.as_bytes(), encode(profile)?)
            .map_err(|e| sled_error("put profile", e))?;
        Ok(())
    }

    async fn list_schedule_policies(&self) -> Result<Vec<SchedulePolicy>, StorageError> {
        let mut policies = Vec::new();
        for entry in self.profiles.iter() {
            let (_, bytes) = entry.map_err(|e| sled_error("scan profiles", e))?;
            let profile: UserProfile = decode(&bytes)?;
            policies.push(profile.schedule);
        }
        policies.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(policies)
    }
}
