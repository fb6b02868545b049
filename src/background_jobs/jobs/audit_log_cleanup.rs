//! Audit log cleanup job function.
//!
//! Deletes job audit entries older than the configured retention period.

use crate::background_jobs::{
    context::JobContext, error::JobError, function::JobFunction, registry::TemplateRegistry,
    template::JobTemplate,
};
use crate::job_store::{TemplateKind, TemplateType};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveTime, Utc, Weekday};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

pub const AUDIT_LOG_CLEANUP_ID: &str = "audit_log_cleanup";

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

pub struct AuditLogCleanupJob {
    retention_days: u64,
}

impl AuditLogCleanupJob {
    pub fn new(retention_days: u64) -> Self {
        Self { retention_days }
    }

    /// Unix timestamp before which entries are deleted.
    fn cutoff(&self, now: i64) -> i64 {
        now - (self.retention_days as i64 * SECONDS_PER_DAY)
    }
}

#[async_trait]
impl JobFunction for AuditLogCleanupJob {
    fn id(&self) -> &str {
        AUDIT_LOG_CLEANUP_ID
    }

    fn description(&self) -> &str {
        "Delete old job audit log entries based on retention policy"
    }

    async fn execute(&self, ctx: &JobContext, _args: Value) -> Result<Value> {
        ctx.progress(0, 1);

        let cutoff = self.cutoff(Utc::now().timestamp());
        info!(
            "Cleaning up job audit entries older than {} days (cutoff: {})",
            self.retention_days, cutoff
        );
        let deleted = ctx.store.cleanup_old_job_audit_entries(cutoff).await?;

        if deleted > 0 {
            info!("Deleted {} old job audit entries", deleted);
        } else {
            info!("No job audit entries to clean up");
        }
        ctx.progress(1, 1);

        Ok(json!({
            "deleted": deleted,
            "retention_days": self.retention_days,
        }))
    }
}

/// Make sure a periodic cleanup template exists: daily at 03:00, every weekday.
///
/// Returns the existing template if one already points at the cleanup function.
pub async fn ensure_cleanup_template(
    registry: &TemplateRegistry,
) -> Result<Arc<JobTemplate>, JobError> {
    let existing = registry
        .list_by_kind(TemplateType::Periodic)?
        .into_iter()
        .find(|t| t.function_id().map(|f| f == AUDIT_LOG_CLEANUP_ID).unwrap_or(false));
    if let Some(template) = existing {
        return Ok(template);
    }

    let three_am = NaiveTime::from_hms_opt(3, 0, 0)
        .ok_or_else(|| JobError::Validation("invalid cleanup time".to_string()))?;
    let every_day = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ];
    let template = registry
        .create(
            TemplateKind::periodic(three_am, every_day),
            AUDIT_LOG_CLEANUP_ID,
        )
        .await?;
    info!("Provisioned audit log cleanup template {}", template.short_id());
    Ok(template)
}
