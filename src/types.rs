//! Core domain types shared across the pipeline.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Dietary targets for one person or one merged household.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealPreferences {
    pub number_of_meals: u32,
    pub servings_per_meal: u32,
    pub min_protein_per_meal: u32,
    pub max_calories_per_meal: u32,
    pub dietary_restrictions: Vec<String>,
}

/// One household member's constraints, merged into the primary
/// preferences before prompt building. Null fields sit out of the
/// min/max reductions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseholdMemberConstraint {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub dietary_restrictions: Vec<String>,
    pub min_protein_per_meal: Option<u32>,
    pub max_calories_per_meal: Option<u32>,
}

/// Immutable description of one generation job. `plan_id` is the durable
/// key shared by the plan record and the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    pub user_id: String,
    pub plan_id: String,
    pub number_of_meals: u32,
    pub servings_per_meal: u32,
    pub min_protein_per_meal: u32,
    pub max_calories_per_meal: u32,
    pub dietary_restrictions: Vec<String>,
    #[serde(default)]
    pub household_members: Vec<HouseholdMemberConstraint>,
    pub price_lookup_enabled: bool,
    pub model_id: String,
    pub recipients: Vec<String>,
    #[serde(default)]
    pub test_mode: bool,
}

impl PlanRequest {
    pub fn preferences(&self) -> MealPreferences {
        MealPreferences {
            number_of_meals: self.number_of_meals,
            servings_per_meal: self.servings_per_meal,
            min_protein_per_meal: self.min_protein_per_meal,
            max_calories_per_meal: self.max_calories_per_meal,
            dietary_restrictions: self.dietary_restrictions.clone(),
        }
    }
}

/// Per-serving nutrition facts, as returned by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nutrition {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub fiber: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub item: String,
    pub amount: String,
}

/// One generated meal. Produced once per job and immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedMeal {
    pub day: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub ingredients: Vec<Ingredient>,
    pub instructions: Vec<String>,
    pub prep_time: String,
    pub cook_time: String,
    pub nutrition: Nutrition,
}

/// Lifecycle of a persisted plan record. The worker that owns the job is
/// the only writer once the plan leaves `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PlanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanStatus::Pending => "PENDING",
            PlanStatus::Processing => "PROCESSING",
            PlanStatus::Completed => "COMPLETED",
            PlanStatus::Failed => "FAILED",
        }
    }

    /// Statuses that block the scheduler from creating another plan for
    /// the same (user, week). A failed plan does not block; the next
    /// firing may try again.
    pub fn blocks_new_plan(self) -> bool {
        !matches!(self, PlanStatus::Failed)
    }
}

/// One user's recurring generation trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePolicy {
    pub user_id: String,
    /// 0 = Sunday .. 6 = Saturday
    pub day_of_week: u8,
    pub hour: u8,
    pub minute: u8,
    pub enabled: bool,
}

/// Everything the scheduler needs to build a `PlanRequest` for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub email: String,
    pub preferences: MealPreferences,
    #[serde(default)]
    pub household_members: Vec<HouseholdMemberConstraint>,
    pub price_lookup_enabled: bool,
    #[serde(default)]
    pub recipients: Vec<String>,
    pub schedule: SchedulePolicy,
}

impl UserProfile {
    /// Recipients for plan email: explicit list if set, otherwise the
    /// user's own address plus any household member addresses.
    pub fn effective_recipients(&self) -> Vec<String> {
        if !self.recipients.is_empty() {
            return self.recipients.clone();
        }
        let mut recipients = vec![self.email.clone()];
        for member in &self.household_members {
            if let Some(email) = &member.email {
                if !recipients.contains(email) {
                    recipients.push(email.clone());
                }
            }
        }
        recipients
    }
}

/// Start of the week a plan targets: the next Sunday at midnight, or
/// today when today is Sunday.
pub fn next_week_start(today: NaiveDate) -> NaiveDate {
    let offset = (7 - today.weekday().num_days_from_sunday()) % 7;
    today + chrono::Days::new(offset as u64)
}

/// Human label for a week, used in email subjects and CLI output.
pub fn week_label(week_start: NaiveDate) -> String {
    format!("Week of {}", week_start.format("%B %-d, %Y"))
}
