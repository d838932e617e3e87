//! Generation orchestration.
//!
//! Builds the prompts, issues exactly one generative call per job
//! attempt, validates the structured response, and rolls the result
//! into a categorized shopping list. There is no tool loop and no
//! partial repair: a malformed response fails the whole attempt and the
//! queue's retry policy decides what happens next.

pub mod prompt;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::PlanError;
use crate::lookup::ProductLookup;
use crate::mail::{plan_subject, render_plan_digest, EmailSender};
use crate::preferences::merge_preferences;
use crate::progress::ProgressSink;
use crate::provider::GenerativeClient;
use crate::repository::PlanRepository;
use crate::shopping::{build_shopping_list, CategorizedShoppingList};
use crate::types::{next_week_start, week_label, GeneratedMeal, PlanRequest};

/// Recent distinct meal names fed to the variety hint.
const RECENT_MEAL_HINT_COUNT: usize = 4;

/// Result of one successful generation run.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub meals: Vec<GeneratedMeal>,
    pub shopping_list: CategorizedShoppingList,
    pub product_links: HashMap<String, String>,
    pub email_sent: bool,
    pub iteration_count: u32,
}

#[derive(Deserialize)]
struct MealPlanResponse {
    meals: Vec<GeneratedMeal>,
}

/// Drives one generation attempt end to end.
pub struct PlanOrchestrator {
    client: Box<dyn GenerativeClient>,
    repository: Arc<dyn PlanRepository>,
    mailer: Arc<dyn EmailSender>,
    lookup: Arc<dyn ProductLookup>,
}

impl PlanOrchestrator {
    pub fn new(
        client: Box<dyn GenerativeClient>,
        repository: Arc<dyn PlanRepository>,
        mailer: Arc<dyn EmailSender>,
        lookup: Arc<dyn ProductLookup>,
    ) -> Self {
        Self {
            client,
            repository,
            mailer,
            lookup,
        }
    }

    pub async fn generate(
        &self,
        request: &PlanRequest,
        progress: &dyn ProgressSink,
    ) -> Result<PlanOutcome, PlanError> {
        progress.report(0, "Starting meal plan generation");

        let merged = merge_preferences(&request.preferences(), &request.household_members);
        let recent_meals = self
            .repository
            .recent_meal_names(&request.user_id, RECENT_MEAL_HINT_COUNT)
            .await?;

        let label = week_label(next_week_start(chrono::Utc::now().date_naive()));
        let system_prompt = prompt::build_system_prompt(request, &merged);
        let user_prompt = prompt::build_user_prompt(request, &merged, &recent_meals, &label);

        progress.report(10, "Sending request to the model");
        debug!(
            model = %self.client.model_name(),
            provider = %self.client.provider_name(),
            recent_meals = recent_meals.len(),
            "issuing generation call"
        );
        let response = self.client.complete(&system_prompt, &user_prompt).await?;

        progress.report(50, "Received meal plan from the model");
        let meals = parse_meal_plan(&response.content)?;
        info!(
            meal_count = meals.len(),
            model = %response.model,
            "meal plan parsed"
        );

        progress.report(60, "Aggregating shopping list");
        let shopping_list = build_shopping_list(&meals);

        let product_links = if request.price_lookup_enabled {
            self.collect_product_links(&shopping_list).await?
        } else {
            HashMap::new()
        };

        progress.report(75, "Rendering plan email");
        let email_sent = self
            .send_plan_email(request, &label, &meals, &shopping_list, &product_links)
            .await?;

        progress.report(100, "Meal plan generation complete");
        Ok(PlanOutcome {
            meals,
            shopping_list,
            product_links,
            email_sent,
            iteration_count: 1,
        })
    }

    async fn collect_product_links(
        &self,
        shopping_list: &CategorizedShoppingList,
    ) -> Result<HashMap<String, String>, PlanError> {
        let mut links = HashMap::new();
        for section in &shopping_list.sections {
            for item in &section.items {
                if let Some(found) = self.lookup.lookup(&item.item).await? {
                    links.insert(item.item.clone(), found.link);
                }
            }
        }
        Ok(links)
    }

    async fn send_plan_email(
        &self,
        request: &PlanRequest,
        label: &str,
        meals: &[GeneratedMeal],
        shopping_list: &CategorizedShoppingList,
        product_links: &HashMap<String, String>,
    ) -> Result<bool, PlanError> {
        if request.test_mode || request.recipients.is_empty() {
            debug!(
                test_mode = request.test_mode,
                recipients = request.recipients.len(),
                "skipping plan email"
            );
            return Ok(false);
        }
        let subject = plan_subject(label);
        let body = render_plan_digest(label, meals, shopping_list, product_links);
        self.mailer.send(&subject, &body, &request.recipients).await
    }
}

/// Strip a Markdown code fence if the model wrapped its JSON in one.
fn extract_json_payload(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Parse and validate the structured response. Every meal must be
/// complete; there is no partial acceptance.
fn parse_meal_plan(content: &str) -> Result<Vec<GeneratedMeal>, PlanError> {
    let payload = extract_json_payload(content);
    let parsed: MealPlanResponse = serde_json::from_str(payload)
        .map_err(|e| PlanError::ValidationFailed(format!("malformed meal plan JSON: {}", e)))?;

    if parsed.meals.is_empty() {
        return Err(PlanError::ValidationFailed(
            "meal plan contains no meals".to_string(),
        ));
    }
    for (index, meal) in parsed.meals.iter().enumerate() {
        if meal.name.trim().is_empty() {
            return Err(PlanError::ValidationFailed(format!(
                "meal {} has an empty name",
                index + 1
            )));
        }
        if meal.ingredients.is_empty() {
            return Err(PlanError::ValidationFailed(format!(
                "meal '{}' has no ingredients",
                meal.name
            )));
        }
        if meal.instructions.is_empty() {
            return Err(PlanError::ValidationFailed(format!(
                "meal '{}' has no instructions",
                meal.name
            )));
        }
    }
    Ok(parsed.meals)
}
