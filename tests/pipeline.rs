//! Queue and worker lifecycle tests: idempotent enqueue, retry
//! behavior, progress, cancellation, and plan record transitions.

mod support;

use std::time::Duration;

use larder::error::PlanError;
use larder::queue::{job_id_for_plan, JobState};
use larder::repository::PlanRepository;
use larder::scheduler::{build_plan_request, ScheduleOutcome, Scheduler};
use larder::types::{next_week_start, PlanStatus};

use support::{harness, profile, valid_plan_json};

const WAIT: Option<Duration> = Some(Duration::from_secs(10));

#[tokio::test]
async fn enqueue_is_idempotent_per_plan_id() {
    let h = harness(vec![]);
    let week = next_week_start(chrono::Utc::now().date_naive());
    let plan = h.repo.create_plan("u1", week, "model-a").await.unwrap();
    let request = build_plan_request(&profile("u1"), &plan.plan_id, "model-a", true);

    let first = h.queue.enqueue(request.clone()).unwrap();
    let second = h.queue.enqueue(request).unwrap();

    assert_eq!(first, second);
    assert_eq!(first, job_id_for_plan(&plan.plan_id));
    assert_eq!(h.queue.stats().pending, 1);
}

#[tokio::test]
async fn on_demand_enqueue_creates_no_second_plan_record() {
    let h = harness(vec![]);
    h.repo.upsert_profile(&profile("u1")).await.unwrap();
    let scheduler = Scheduler::new(h.repo.clone(), h.queue.clone(), "model-a");

    let first = scheduler.enqueue_now("u1", true).await.unwrap();
    assert!(matches!(first, ScheduleOutcome::Enqueued { .. }));

    let second = scheduler.enqueue_now("u1", true).await.unwrap();
    assert!(matches!(second, ScheduleOutcome::Skipped { .. }));
    assert_eq!(h.repo.plan_count(), 1);
}

#[tokio::test]
async fn successful_job_completes_with_full_progress() {
    let h = harness(vec![Ok(valid_plan_json(&["Herb salmon", "Beef stir fry"]))]);
    h.repo.upsert_profile(&profile("u1")).await.unwrap();
    let scheduler = Scheduler::new(h.repo.clone(), h.queue.clone(), "model-a");

    let ScheduleOutcome::Enqueued {
        plan_id, job_id, ..
    } = scheduler.enqueue_now("u1", true).await.unwrap()
    else {
        panic!("expected enqueue");
    };

    h.queue.start();
    let record = h.queue.wait_for_terminal(&job_id, WAIT).await.unwrap();
    h.queue.stop().await;

    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.attempts_made, 1);
    assert_eq!(record.progress, 100);
    assert!(record.finished_on_ms.is_some());

    let plan = h.repo.get_plan(&plan_id).await.unwrap().unwrap();
    assert_eq!(plan.status, PlanStatus::Completed);
    assert!(plan.shopping_list.is_some());
    // Test mode suppresses mail.
    assert!(!plan.email_sent);
    assert!(h.mailer.sent.lock().is_empty());

    // Meals were recorded for future variety hints.
    let names = h.repo.recent_meal_names("u1", 4).await.unwrap();
    assert!(names.contains(&"Herb salmon".to_string()));
}

#[tokio::test]
async fn job_retries_then_succeeds_on_third_attempt() {
    let h = harness(vec![
        Err("connection reset".to_string()),
        Err("connection reset".to_string()),
        Ok(valid_plan_json(&["Comeback curry"])),
    ]);
    h.repo.upsert_profile(&profile("u1")).await.unwrap();
    let scheduler = Scheduler::new(h.repo.clone(), h.queue.clone(), "model-a");

    let ScheduleOutcome::Enqueued { job_id, plan_id, .. } =
        scheduler.enqueue_now("u1", true).await.unwrap()
    else {
        panic!("expected enqueue");
    };

    h.queue.start();
    let record = h.queue.wait_for_terminal(&job_id, WAIT).await.unwrap();
    h.queue.stop().await;

    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.attempts_made, 3);
    assert_eq!(h.script.call_count(), 3);

    let plan = h.repo.get_plan(&plan_id).await.unwrap().unwrap();
    assert_eq!(plan.status, PlanStatus::Completed);
    assert!(plan.job_error.is_none());
}

#[tokio::test]
async fn retry_exhaustion_fails_the_job_and_the_plan() {
    let h = harness(vec![
        Err("model unavailable".to_string()),
        Err("model unavailable".to_string()),
        Err("model unavailable".to_string()),
    ]);
    h.repo.upsert_profile(&profile("u1")).await.unwrap();
    let scheduler = Scheduler::new(h.repo.clone(), h.queue.clone(), "model-a");

    let ScheduleOutcome::Enqueued { job_id, plan_id, .. } =
        scheduler.enqueue_now("u1", true).await.unwrap()
    else {
        panic!("expected enqueue");
    };

    h.queue.start();
    let record = h.queue.wait_for_terminal(&job_id, WAIT).await.unwrap();
    h.queue.stop().await;

    assert_eq!(record.state, JobState::Failed);
    assert_eq!(record.attempts_made, 3);
    let reason = record.failed_reason.expect("failed reason populated");
    assert!(reason.contains("model unavailable"));
    assert!(record.progress < 100);

    // The plan reaches `failed` only after the final attempt, with the
    // last failure's message.
    let plan = h.repo.get_plan(&plan_id).await.unwrap().unwrap();
    assert_eq!(plan.status, PlanStatus::Failed);
    assert!(plan.job_error.unwrap().contains("model unavailable"));
}

#[tokio::test]
async fn malformed_response_is_retried_as_validation_failure() {
    let h = harness(vec![
        Ok("this is not json".to_string()),
        Ok(valid_plan_json(&["Recovered roast"])),
    ]);
    h.repo.upsert_profile(&profile("u1")).await.unwrap();
    let scheduler = Scheduler::new(h.repo.clone(), h.queue.clone(), "model-a");

    let ScheduleOutcome::Enqueued { job_id, .. } =
        scheduler.enqueue_now("u1", true).await.unwrap()
    else {
        panic!("expected enqueue");
    };

    h.queue.start();
    let record = h.queue.wait_for_terminal(&job_id, WAIT).await.unwrap();
    h.queue.stop().await;

    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.attempts_made, 2);
}

#[tokio::test]
async fn email_goes_out_when_not_in_test_mode() {
    let h = harness(vec![Ok(valid_plan_json(&["Mailed meatballs"]))]);
    h.repo.upsert_profile(&profile("u1")).await.unwrap();
    let scheduler = Scheduler::new(h.repo.clone(), h.queue.clone(), "model-a");

    let ScheduleOutcome::Enqueued { job_id, plan_id, .. } =
        scheduler.enqueue_now("u1", false).await.unwrap()
    else {
        panic!("expected enqueue");
    };

    h.queue.start();
    let record = h.queue.wait_for_terminal(&job_id, WAIT).await.unwrap();
    h.queue.stop().await;

    assert_eq!(record.state, JobState::Completed);
    let plan = h.repo.get_plan(&plan_id).await.unwrap().unwrap();
    assert!(plan.email_sent);

    let sent = h.mailer.sent.lock();
    assert_eq!(sent.len(), 1);
    let (subject, recipients) = &sent[0];
    assert!(subject.contains("Meal Plan"));
    // Household fallback: owner plus member address.
    assert_eq!(recipients.len(), 2);
    assert!(recipients.contains(&"u1@example.com".to_string()));
}

#[tokio::test]
async fn cancel_works_only_before_dispatch() {
    let h = harness(vec![Ok(valid_plan_json(&["Never cooked"]))]);
    let week = next_week_start(chrono::Utc::now().date_naive());
    let plan = h.repo.create_plan("u1", week, "model-a").await.unwrap();
    let request = build_plan_request(&profile("u1"), &plan.plan_id, "model-a", true);

    // Workers not started: the job is still queued and cancelable.
    let job_id = h.queue.enqueue(request.clone()).unwrap();
    h.queue.cancel(&job_id).unwrap();
    assert!(matches!(
        h.queue.get_status(&job_id),
        Err(PlanError::JobNotFound(_))
    ));

    // Re-enqueue, let it run to completion, then cancellation must be
    // rejected.
    let job_id = h.queue.enqueue(request).unwrap();
    h.queue.start();
    h.queue.wait_for_terminal(&job_id, WAIT).await.unwrap();
    h.queue.stop().await;
    assert!(matches!(
        h.queue.cancel(&job_id),
        Err(PlanError::JobNotCancelable(_))
    ));
}

#[tokio::test]
async fn recovery_requeues_jobs_after_restart() {
    let h = harness(vec![Ok(valid_plan_json(&["Recovered ragu"]))]);
    let week = next_week_start(chrono::Utc::now().date_naive());
    let plan = h.repo.create_plan("u1", week, "model-a").await.unwrap();
    let request = build_plan_request(&profile("u1"), &plan.plan_id, "model-a", true);

    // Enqueued but never started: simulates a process that died before
    // its workers ran.
    let job_id = h.queue.enqueue(request).unwrap();

    let recovered = h.queue.recover().unwrap();
    assert_eq!(recovered, 1);

    h.queue.start();
    let record = h.queue.wait_for_terminal(&job_id, WAIT).await.unwrap();
    h.queue.stop().await;
    assert_eq!(record.state, JobState::Completed);
}
