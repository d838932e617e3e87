//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use larder::error::PlanError;
use larder::lookup::DisabledLookup;
use larder::mail::EmailSender;
use larder::provider::{ClientFactory, CompletionResponse, GenerativeClient, TokenUsage};
use larder::queue::{PlanQueue, QueueConfig, RetryPolicy, WorkerDeps};
use larder::repository::MemoryPlanRepository;
use larder::types::{HouseholdMemberConstraint, MealPreferences, SchedulePolicy, UserProfile};

/// Scripted responses shared between every client the factory hands
/// out: `Ok(content)` completes, `Err(message)` fails the call.
pub struct Script {
    responses: Mutex<VecDeque<Result<String, String>>>,
    pub calls: AtomicUsize,
}

impl Script {
    pub fn new(responses: Vec<Result<String, String>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub struct ScriptedClient {
    script: Arc<Script>,
    model: String,
}

#[async_trait]
impl GenerativeClient for ScriptedClient {
    async fn complete(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
    ) -> Result<CompletionResponse, PlanError> {
        self.script.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(valid_plan_json(&["Fallback meal"])));
        match next {
            Ok(content) => Ok(CompletionResponse {
                content,
                model: self.model.clone(),
                usage: TokenUsage::default(),
            }),
            Err(message) => Err(PlanError::UpstreamCall(message)),
        }
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

pub struct ScriptedFactory {
    pub script: Arc<Script>,
}

impl ClientFactory for ScriptedFactory {
    fn create_client(&self, model_id: &str) -> Result<Box<dyn GenerativeClient>, PlanError> {
        Ok(Box::new(ScriptedClient {
            script: Arc::clone(&self.script),
            model: model_id.to_string(),
        }))
    }
}

/// Mailer that records every send.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<(String, Vec<String>)>>,
}

#[async_trait]
impl EmailSender for RecordingMailer {
    async fn send(
        &self,
        subject: &str,
        _html_body: &str,
        recipients: &[String],
    ) -> Result<bool, PlanError> {
        self.sent
            .lock()
            .push((subject.to_string(), recipients.to_vec()));
        Ok(true)
    }
}

/// A structurally valid meal-plan response with the given meal names.
pub fn valid_plan_json(meal_names: &[&str]) -> String {
    let meals: Vec<String> = meal_names
        .iter()
        .enumerate()
        .map(|(index, name)| {
            format!(
                r#"{{
                    "day": "Day {day}",
                    "name": "{name}",
                    "description": "A test meal.",
                    "ingredients": [
                        {{"item": "chicken breast", "amount": "1 lb"}},
                        {{"item": "rice", "amount": "1 cup"}}
                    ],
                    "instructions": ["Cook it."],
                    "prepTime": "10 min",
                    "cookTime": "20 min",
                    "nutrition": {{"calories": 520, "protein": 45, "carbs": 40, "fat": 15, "fiber": 4}}
                }}"#,
                day = index + 1,
                name = name
            )
        })
        .collect();
    format!(r#"{{"meals": [{}]}}"#, meals.join(","))
}

pub fn profile(user_id: &str) -> UserProfile {
    UserProfile {
        user_id: user_id.to_string(),
        email: format!("{user_id}@example.com"),
        preferences: MealPreferences {
            number_of_meals: 3,
            servings_per_meal: 2,
            min_protein_per_meal: 40,
            max_calories_per_meal: 600,
            dietary_restrictions: vec!["nut-free".to_string()],
        },
        household_members: vec![HouseholdMemberConstraint {
            name: Some("Sam".to_string()),
            email: Some(format!("{user_id}-partner@example.com")),
            dietary_restrictions: vec!["vegan".to_string()],
            min_protein_per_meal: Some(50),
            max_calories_per_meal: None,
        }],
        price_lookup_enabled: false,
        recipients: vec![],
        schedule: SchedulePolicy {
            user_id: user_id.to_string(),
            day_of_week: 0,
            hour: 8,
            minute: 0,
            enabled: true,
        },
    }
}

/// Queue config tuned for tests: fast backoff, same limits otherwise.
pub fn fast_queue_config() -> QueueConfig {
    QueueConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(10),
        },
        ..QueueConfig::default()
    }
}

/// Everything a pipeline test needs, wired together over a temp sled db
/// and the in-memory repository.
pub struct Harness {
    pub repo: Arc<MemoryPlanRepository>,
    pub queue: Arc<PlanQueue>,
    pub script: Arc<Script>,
    pub mailer: Arc<RecordingMailer>,
    _dir: TempDir,
}

pub fn harness(responses: Vec<Result<String, String>>) -> Harness {
    harness_with_config(responses, fast_queue_config())
}

pub fn harness_with_config(
    responses: Vec<Result<String, String>>,
    config: QueueConfig,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let db = sled::open(dir.path().join("queue")).unwrap();
    let repo = Arc::new(MemoryPlanRepository::new());
    let script = Script::new(responses);
    let mailer = Arc::new(RecordingMailer::default());
    let deps = WorkerDeps {
        repository: repo.clone(),
        providers: Arc::new(ScriptedFactory {
            script: Arc::clone(&script),
        }),
        mailer: mailer.clone(),
        lookup: Arc::new(DisabledLookup),
    };
    let queue = Arc::new(PlanQueue::new(&db, config, deps).unwrap());
    Harness {
        repo,
        queue,
        script,
        mailer,
        _dir: dir,
    }
}
