//! End-to-end tests for the minute scheduler
//!
//! Ticks are driven with fixed timestamps instead of the wall clock.

mod common;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use common::TestService;
use harvest_jobs::background_jobs::{JobTemplate, MinuteScheduler};
use harvest_jobs::job_store::{JobRecord, TemplateKind, TemplateStatus};
use std::sync::Arc;
use std::time::Duration;

// 2024-01-02 is a Tuesday.
fn tuesday(h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

async fn periodic(service: &TestService, h: u32, m: u32, days: &[Weekday]) -> Arc<JobTemplate> {
    service
        .registry
        .create(
            TemplateKind::periodic(
                NaiveTime::from_hms_opt(h, m, 0).unwrap(),
                days.iter().copied(),
            ),
            "record",
        )
        .await
        .unwrap()
}

async fn wait_for_history(service: &TestService, template_id: &str, count: usize) -> Vec<JobRecord> {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let history = service.store.get_job_history(template_id, 10).await.unwrap();
            if history.len() >= count {
                return history;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("scheduled job was never created")
}

#[tokio::test]
async fn test_tick_fires_templates_due_in_current_minute() {
    let service = TestService::spawn().await;
    let due = periodic(&service, 9, 0, &[Weekday::Tue]).await;
    let later = periodic(&service, 9, 1, &[Weekday::Tue]).await;
    let other_day = periodic(&service, 9, 0, &[Weekday::Wed]).await;

    let scheduler = MinuteScheduler::new(Arc::clone(&service.registry));
    let triggered = scheduler.tick(tuesday(9, 0, 30));

    assert_eq!(triggered, vec![due.id().to_string()]);
    let history = wait_for_history(&service, due.id(), 1).await;
    assert_eq!(history.len(), 1);
    service.wait_until_idle().await;

    assert!(service
        .store
        .get_job_history(later.id(), 10)
        .await
        .unwrap()
        .is_empty());
    assert!(service
        .store
        .get_job_history(other_day.id(), 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_consecutive_ticks_fire_once() {
    let service = TestService::spawn().await;
    let template = periodic(&service, 9, 0, &[Weekday::Tue]).await;
    let scheduler = MinuteScheduler::new(Arc::clone(&service.registry));

    assert_eq!(scheduler.tick(tuesday(8, 59, 0)).len(), 0);
    assert_eq!(scheduler.tick(tuesday(9, 0, 0)).len(), 1);
    assert_eq!(scheduler.tick(tuesday(9, 1, 0)).len(), 0);

    wait_for_history(&service, template.id(), 1).await;
    service.wait_until_idle().await;
    assert_eq!(
        service
            .store
            .get_job_history(template.id(), 10)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_inactive_and_deleted_templates_are_skipped() {
    let service = TestService::spawn().await;
    let inactive = periodic(&service, 9, 0, &[Weekday::Tue]).await;
    inactive.update_status(TemplateStatus::Inactive).await.unwrap();
    let deleted = periodic(&service, 9, 0, &[Weekday::Tue]).await;
    service.registry.delete(deleted.id()).await.unwrap();

    let scheduler = MinuteScheduler::new(Arc::clone(&service.registry));
    assert!(scheduler.tick(tuesday(9, 0, 10)).is_empty());
}

#[tokio::test]
async fn test_rest_templates_are_never_scheduled() {
    let service = TestService::spawn().await;
    let scheduler = MinuteScheduler::new(Arc::clone(&service.registry));

    for minute in 0..60 {
        assert!(scheduler.tick(tuesday(12, minute, 0)).is_empty());
    }
}

#[tokio::test]
async fn test_tick_sees_changes_from_another_registry() {
    let service = TestService::spawn().await;
    let removed = periodic(&service, 9, 0, &[Weekday::Tue]).await;
    let paused = periodic(&service, 9, 0, &[Weekday::Tue]).await;

    let admin = service.admin_registry().await;
    admin.delete(removed.id()).await.unwrap();
    admin
        .get_by_id(paused.short_id())
        .unwrap()
        .unwrap()
        .update_status(TemplateStatus::Inactive)
        .await
        .unwrap();
    let added = admin
        .create(
            TemplateKind::periodic(NaiveTime::from_hms_opt(9, 0, 0).unwrap(), [Weekday::Tue]),
            "record",
        )
        .await
        .unwrap();

    let scheduler = MinuteScheduler::new(Arc::clone(&service.registry));
    let triggered = scheduler.refresh_and_tick(tuesday(9, 0, 30)).await;

    assert_eq!(triggered, vec![added.id().to_string()]);
    assert!(removed.is_deleted());
    assert_eq!(paused.status().unwrap(), TemplateStatus::Inactive);

    // The job runs on the service's own queue.
    wait_for_history(&service, added.id(), 1).await;
    service.wait_until_idle().await;
    assert!(admin.queue().pending_jobs().is_empty());
    assert!(service
        .store
        .get_job_history(removed.id(), 10)
        .await
        .unwrap()
        .is_empty());
}
