//! Larder CLI: clap definitions, runtime wiring and presentation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Table};
use owo_colors::OwoColorize;
use tracing::info;

use crate::config::LarderConfig;
use crate::error::{PlanError, StorageError};
use crate::lookup::SearchLinkLookup;
use crate::mail::LogMailer;
use crate::provider::{ClientFactory, ProviderRegistry};
use crate::queue::{JobState, PlanQueue, WorkerDeps};
use crate::repository::{PlanRecord, PlanRepository, SledPlanRepository};
use crate::scheduler::{ScheduleOutcome, ScheduleSpec, Scheduler};
use crate::status::StatusService;

/// Larder - scheduled meal plan generation
#[derive(Parser)]
#[command(name = "larder")]
#[command(about = "Scheduled meal plan generation with deterministic shopping-list aggregation")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Data directory (overrides the configured location)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the worker daemon (queue workers + schedule triggers)
    Worker,
    /// Enqueue an on-demand generation for a user
    Generate {
        /// User id to generate for
        #[arg(long)]
        user: String,
        /// Suppress the plan email
        #[arg(long)]
        no_email: bool,
        /// Block until the job finishes and print the shopping list
        #[arg(long)]
        wait: bool,
        /// Wait timeout in seconds
        #[arg(long, default_value = "600")]
        timeout_secs: u64,
    },
    /// Show job status
    Status {
        /// Job id (plan-<planId>)
        job_id: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Plan operations
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Schedule operations
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommands,
    },
}

#[derive(Subcommand)]
pub enum PlanCommands {
    /// Show a stored plan and its shopping list
    Show { plan_id: String },
}

#[derive(Subcommand)]
pub enum ScheduleCommands {
    /// List every user's schedule policy
    List,
    /// Tear down and rebuild all schedule triggers
    Sync,
}

/// Wired runtime shared by all commands.
pub struct RunContext {
    repository: Arc<dyn PlanRepository>,
    queue: Arc<PlanQueue>,
    scheduler: Arc<Scheduler>,
    status: StatusService,
}

impl RunContext {
    pub fn new(config: &LarderConfig) -> Result<Self, PlanError> {
        let data_dir = config.data_dir();
        std::fs::create_dir_all(&data_dir).map_err(|e| {
            PlanError::ConfigError(format!("Failed to create data dir {:?}: {}", data_dir, e))
        })?;
        let db = sled::open(data_dir.join("larder.db")).map_err(|e| {
            PlanError::ConfigError(format!("Failed to open database: {}", e))
        })?;

        let repository: Arc<dyn PlanRepository> = Arc::new(SledPlanRepository::open(&db)?);
        let providers: Arc<dyn ClientFactory> = Arc::new(ProviderRegistry::from_config(
            &config.providers,
            config.scheduler.default_provider.clone(),
        ));
        let deps = WorkerDeps {
            repository: Arc::clone(&repository),
            providers,
            mailer: Arc::new(LogMailer),
            lookup: Arc::new(SearchLinkLookup::new(config.lookup.search_base_url.clone())),
        };
        let queue = Arc::new(PlanQueue::new(&db, config.queue.to_queue_config(), deps)?);
        let scheduler = Scheduler::new(
            Arc::clone(&repository),
            Arc::clone(&queue),
            config.scheduler.default_model.clone(),
        );
        let status = StatusService::new(Arc::clone(&queue));

        Ok(Self {
            repository,
            queue,
            scheduler,
            status,
        })
    }

    pub async fn execute(&self, command: &Commands) -> Result<String, PlanError> {
        match command {
            Commands::Worker => self.run_worker().await,
            Commands::Generate {
                user,
                no_email,
                wait,
                timeout_secs,
            } => self.run_generate(user, *no_email, *wait, *timeout_secs).await,
            Commands::Status { job_id, format } => self.run_status(job_id, format),
            Commands::Plan {
                command: PlanCommands::Show { plan_id },
            } => self.run_plan_show(plan_id).await,
            Commands::Schedule { command } => match command {
                ScheduleCommands::List => self.run_schedule_list().await,
                ScheduleCommands::Sync => self.run_schedule_sync().await,
            },
        }
    }

    async fn run_worker(&self) -> Result<String, PlanError> {
        let recovered = self.queue.recover()?;
        self.queue.start();
        let registered = self.scheduler.resync().await?;
        info!(recovered, registered, "worker daemon started");

        tokio::signal::ctrl_c().await.map_err(|e| {
            PlanError::ConfigError(format!("Failed to listen for shutdown signal: {}", e))
        })?;
        info!("shutdown signal received");

        self.scheduler.shutdown();
        self.queue.stop().await;
        Ok("Worker daemon stopped.".to_string())
    }

    async fn run_generate(
        &self,
        user: &str,
        no_email: bool,
        wait: bool,
        timeout_secs: u64,
    ) -> Result<String, PlanError> {
        let outcome = self.scheduler.enqueue_now(user, no_email).await?;
        let (plan_id, job_id) = match &outcome {
            ScheduleOutcome::Enqueued {
                plan_id, job_id, ..
            } => (plan_id.clone(), job_id.clone()),
            ScheduleOutcome::Skipped { reason } => {
                return Ok(format!("Skipped: {}", reason));
            }
        };

        if !wait {
            // The job is durably queued; a running worker daemon (or the
            // next one to start) picks it up.
            return Ok(format!(
                "Generation enqueued.\n  plan: {}\n  job:  {}",
                plan_id, job_id
            ));
        }

        self.queue.recover()?;
        self.queue.start();
        let record = self
            .queue
            .wait_for_terminal(&job_id, Some(Duration::from_secs(timeout_secs)))
            .await?;
        self.queue.stop().await;

        match record.state {
            JobState::Completed => {
                let plan = self
                    .repository
                    .get_plan(&plan_id)
                    .await?
                    .ok_or_else(|| StorageError::PlanNotFound(plan_id.clone()))?;
                Ok(format!(
                    "Generation {} after {} attempt(s).\n\n{}",
                    "completed".green(),
                    record.attempts_made,
                    render_plan(&plan)
                ))
            }
            _ => Err(PlanError::RetryExhausted {
                attempts: record.attempts_made,
                reason: record
                    .failed_reason
                    .unwrap_or_else(|| "unknown failure".to_string()),
            }),
        }
    }

    fn run_status(&self, job_id: &str, format: &str) -> Result<String, PlanError> {
        let status = self.status.get_status(job_id)?;
        if format == "json" {
            return serde_json::to_string_pretty(&status)
                .map_err(|e| PlanError::ConfigError(format!("Failed to encode status: {}", e)));
        }

        let mut table = Table::new();
        table.load_preset(UTF8_FULL_CONDENSED);
        table.set_header(vec!["Field", "Value"]);
        table.add_row(vec![Cell::new("job"), Cell::new(&status.job_id)]);
        table.add_row(vec![
            Cell::new("status"),
            Cell::new(render_state(status.status)),
        ]);
        table.add_row(vec![
            Cell::new("progress"),
            Cell::new(format!("{}%", status.progress)),
        ]);
        if let Some(reason) = &status.failed_reason {
            table.add_row(vec![Cell::new("failed reason"), Cell::new(reason)]);
        }
        Ok(table.to_string())
    }

    async fn run_plan_show(&self, plan_id: &str) -> Result<String, PlanError> {
        let plan = self
            .repository
            .get_plan(plan_id)
            .await?
            .ok_or_else(|| StorageError::PlanNotFound(plan_id.to_string()))?;
        Ok(render_plan(&plan))
    }

    async fn run_schedule_list(&self) -> Result<String, PlanError> {
        let policies = self.repository.list_schedule_policies().await?;
        if policies.is_empty() {
            return Ok("No schedules configured.".to_string());
        }

        let mut table = Table::new();
        table.load_preset(UTF8_FULL_CONDENSED);
        table.set_header(vec!["User", "Trigger", "Cron", "Enabled"]);
        for policy in &policies {
            let spec = ScheduleSpec::from(policy);
            table.add_row(vec![
                Cell::new(&policy.user_id),
                Cell::new(format!(
                    "day {} at {:02}:{:02}",
                    policy.day_of_week, policy.hour, policy.minute
                )),
                Cell::new(spec.cron_expression()),
                Cell::new(if policy.enabled {
                    "yes".green().to_string()
                } else {
                    "no".dimmed().to_string()
                }),
            ]);
        }
        Ok(table.to_string())
    }

    async fn run_schedule_sync(&self) -> Result<String, PlanError> {
        let registered = self.scheduler.resync().await?;
        Ok(format!("Registered {} schedule trigger(s).", registered))
    }
}

fn render_state(state: JobState) -> String {
    match state {
        JobState::Completed => state.as_str().green().to_string(),
        JobState::Failed => state.as_str().red().to_string(),
        JobState::Active => state.as_str().yellow().to_string(),
        JobState::Waiting => state.as_str().dimmed().to_string(),
    }
}

fn render_plan(plan: &PlanRecord) -> String {
    let mut output = format!(
        "Plan {} for {} (week of {}) - {}\n",
        plan.plan_id,
        plan.user_id,
        plan.week_start,
        plan.status.as_str()
    );
    if let Some(error) = &plan.job_error {
        output.push_str(&format!("Error: {}\n", error));
    }
    let Some(shopping_list) = &plan.shopping_list else {
        return output;
    };

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["Category", "Item", "Amount"]);
    for section in &shopping_list.sections {
        for item in &section.items {
            table.add_row(vec![
                Cell::new(section.category.as_str()),
                Cell::new(&item.item),
                Cell::new(&item.amount),
            ]);
        }
    }
    output.push('\n');
    output.push_str(&table.to_string());
    output
}
