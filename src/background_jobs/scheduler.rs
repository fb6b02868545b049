//! Minute clock that fires periodic templates.
//!
//! Each tick looks at the half-open window `[minute start, minute start + 1 min)`
//! containing "now". A periodic template fires when today is one of its days and
//! today's invocation instant falls inside that window. Ticks only ever arrive at
//! or after a minute boundary, so truncating "now" catches a late tick without
//! firing twice across consecutive ticks.

use super::registry::TemplateRegistry;
use crate::job_store::{TemplateKind, TemplateType};
use crate::server::metrics;
use chrono::{Datelike, Duration as ChronoDuration, Local, NaiveDateTime, Timelike};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Start of the minute containing `now`, and the start of the next one.
pub fn trigger_window(now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    let start = now
        .date()
        .and_hms_opt(now.hour(), now.minute(), 0)
        .unwrap_or(now);
    (start, start + ChronoDuration::minutes(1))
}

/// Whether a template of `kind` fires on the tick observed at `now`.
pub fn should_trigger(kind: &TemplateKind, now: NaiveDateTime) -> bool {
    let TemplateKind::Periodic {
        time_of_invocation,
        days_of_invocation,
    } = kind
    else {
        return false;
    };

    if !days_of_invocation.contains(&now.weekday()) {
        return false;
    }
    let (window_start, window_end) = trigger_window(now);
    let invocation = now.date().and_time(*time_of_invocation);
    window_start <= invocation && invocation < window_end
}

/// The minute boundary the next tick belongs to.
///
/// Normally the boundary after `now`. If the wall clock has fallen behind a
/// boundary that was already ticked, the tick after that one instead, so a
/// minute is never checked twice.
pub fn next_tick_target(now: NaiveDateTime, last_tick: Option<NaiveDateTime>) -> NaiveDateTime {
    let (_, next) = trigger_window(now);
    match last_tick {
        Some(last) if next <= last => last + ChronoDuration::minutes(1),
        _ => next,
    }
}

/// Instant to evaluate a tick at after waking for `target`.
///
/// Waking early (wall clock slewed behind the monotonic timer) still counts as
/// `target`; waking late keeps the observed time.
pub fn tick_instant(target: NaiveDateTime, woke_at: NaiveDateTime) -> NaiveDateTime {
    woke_at.max(target)
}

pub struct MinuteScheduler {
    registry: Arc<TemplateRegistry>,
}

impl MinuteScheduler {
    pub fn new(registry: Arc<TemplateRegistry>) -> Self {
        Self { registry }
    }

    /// Invoke every periodic template due at `now` and return their ids.
    ///
    /// Invocations are spawned; this never waits for a job to be created or run.
    pub fn tick(&self, now: NaiveDateTime) -> Vec<String> {
        metrics::record_scheduler_tick();

        let templates = match self.registry.list_by_kind(TemplateType::Periodic) {
            Ok(templates) => templates,
            Err(e) => {
                error!("Scheduler tick skipped: {}", e);
                return Vec::new();
            }
        };

        let mut triggered = Vec::new();
        for template in templates {
            let (Ok(kind), Ok(status)) = (template.kind(), template.status()) else {
                continue;
            };
            if !status.accepts_invocations() || !should_trigger(kind, now) {
                continue;
            }

            debug!("Template {} is due at {}", template.short_id(), now);
            triggered.push(template.id().to_string());
            metrics::record_template_triggered("schedule");
            tokio::spawn(async move {
                if let Err(e) = template.invoke(Value::Null).await {
                    warn!("Scheduled invocation of {} failed: {}", template.short_id(), e);
                }
            });
        }

        if !triggered.is_empty() {
            info!("Scheduler triggered {} template(s) at {}", triggered.len(), now);
        }
        triggered
    }

    /// Reload templates from the store, then tick.
    ///
    /// Picks up templates created, deleted or re-statused by another process
    /// sharing the database. A failed reload ticks with the templates in memory.
    pub async fn refresh_and_tick(&self, now: NaiveDateTime) -> Vec<String> {
        if let Err(e) = self.registry.load().await {
            warn!("Template reload failed, using cached templates: {}", e);
        }
        self.tick(now)
    }

    /// Tick at every local minute boundary until `shutdown` is cancelled.
    ///
    /// Running jobs are left alone on shutdown.
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Minute scheduler started");
        let mut last_tick = None;
        loop {
            let now = Local::now().naive_local();
            let target = next_tick_target(now, last_tick);
            let sleep_duration = (target - now).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    let at = tick_instant(target, Local::now().naive_local());
                    self.refresh_and_tick(at).await;
                    last_tick = Some(target);
                }
                _ = shutdown.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    break;
                }
            }
        }
        info!("Minute scheduler stopped");
    }
}
