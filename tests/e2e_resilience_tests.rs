//! End-to-end tests for retried status writes and the resilience wrappers

mod common;

use common::{FlakyStore, TestService, RECORD_PATH};
use harvest_jobs::background_jobs::{
    with_duration, with_retry, JobError, RetryPolicy, TaskSettings,
};
use harvest_jobs::job_store::{JobStatus, JobStore, TemplateStatus};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test]
async fn test_with_retry_reports_retries_used() {
    let attempts = AtomicU32::new(0);
    let retried = with_retry(
        || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                anyhow::bail!("not yet");
            }
            Ok("done")
        },
        3,
        Duration::from_millis(1),
    )
    .await
    .unwrap();

    assert_eq!(retried.result, "done");
    assert_eq!(retried.retries, 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_with_retry_makes_max_retries_plus_one_attempts() {
    let attempts = AtomicU32::new(0);
    let result = with_retry(
        || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(anyhow::anyhow!("still down"))
        },
        2,
        Duration::from_millis(1),
    )
    .await;

    let err = result.unwrap_err();
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(format!("{:#}", err).contains("still down"));
}

#[tokio::test]
async fn test_with_duration_measures_elapsed_time() {
    let timed = with_duration(|| async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok::<_, anyhow::Error>(7)
    })
    .await
    .unwrap();

    assert_eq!(timed.result, 7);
    assert!(timed.duration_ms >= 20);
}

fn retrying_settings(max_retries: u32) -> TaskSettings {
    TaskSettings {
        store_retry: RetryPolicy::new(max_retries, Duration::from_millis(1)),
        ..TaskSettings::default()
    }
}

#[tokio::test]
async fn test_transient_status_write_failures_are_retried() {
    let flaky = Arc::new(Mutex::new(None::<Arc<FlakyStore>>));
    let slot = Arc::clone(&flaky);
    let service = TestService::spawn_with(
        move |inner| {
            let store = Arc::new(FlakyStore::new(inner, 2));
            *slot.lock().unwrap() = Some(Arc::clone(&store));
            store as Arc<dyn JobStore>
        },
        retrying_settings(3),
    )
    .await;

    let job_id = service.record("flaky").await;
    service.wait_until_idle().await;

    let record = service.store.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Finished);
    assert!(record.started_at.is_some());

    // Two failed writes, then the start and finish writes.
    let flaky = flaky.lock().unwrap().clone().unwrap();
    assert_eq!(flaky.status_attempts.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_exhausted_retries_end_job_in_error() {
    let service = TestService::spawn_with(
        |inner| Arc::new(FlakyStore::new(inner, 2)) as Arc<dyn JobStore>,
        retrying_settings(1),
    )
    .await;

    let job_id = service.record("never-runs").await;
    let task = service.handle.get_task(&job_id).unwrap();
    service.wait_until_idle().await;

    // The start write gave up; the function never ran.
    assert_eq!(task.status(), JobStatus::Error);
    assert!(service.tracker.order().is_empty());
    let record = service.store.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Error);
    assert!(service.handle.list_jobs().is_empty());
}

#[tokio::test]
async fn test_failed_template_status_write_keeps_old_status() {
    let service = TestService::spawn_with(
        |inner| Arc::new(FlakyStore::new(inner, 0).with_template_failures(2)) as Arc<dyn JobStore>,
        TaskSettings::default(),
    )
    .await;
    let template = service
        .registry
        .find_rest_template(RECORD_PATH)
        .unwrap()
        .unwrap();

    let result = template.update_status(TemplateStatus::Inactive).await;
    assert!(matches!(result, Err(JobError::Store(_))));
    assert_eq!(template.status().unwrap(), TemplateStatus::NotStarted);

    // Invoking still queues the job; the template just stays NotStarted.
    let job_id = service.record("still-runs").await;
    service.wait_until_idle().await;
    assert_eq!(template.status().unwrap(), TemplateStatus::NotStarted);
    let stored = service.store.load_templates().await.unwrap();
    let stored = stored.iter().find(|t| t.id == template.id()).unwrap();
    assert_eq!(stored.status, TemplateStatus::NotStarted);
    let record = service.store.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Finished);

    template.update_status(TemplateStatus::Inactive).await.unwrap();
    assert_eq!(template.status().unwrap(), TemplateStatus::Inactive);
}
