//! Durable records for templates and jobs, plus the job audit log.

mod models;
mod schema;
mod sqlite_job_store;

pub use models::*;
pub use schema::JOB_STORE_VERSIONED_SCHEMAS;
pub use sqlite_job_store::SqliteJobStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A status change to be written for a job.
///
/// `at` becomes `started_at` for [`JobStatus::Busy`] and `finished_at` for
/// terminal statuses.
#[derive(Debug, Clone)]
pub struct JobStatusUpdate {
    pub status: JobStatus,
    pub at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl JobStatusUpdate {
    pub fn busy() -> Self {
        Self {
            status: JobStatus::Busy,
            at: Utc::now(),
            error_message: None,
            result: None,
        }
    }

    pub fn finished(result: serde_json::Value) -> Self {
        Self {
            status: JobStatus::Finished,
            at: Utc::now(),
            error_message: None,
            result: Some(result),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Error,
            at: Utc::now(),
            error_message: Some(message.into()),
            result: None,
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    // Templates
    async fn persist_template(&self, template: &TemplateRecord) -> Result<()>;
    async fn update_template_status(&self, template_id: &str, status: TemplateStatus)
        -> Result<()>;
    /// Returns false if no template with this id existed.
    async fn delete_template(&self, template_id: &str) -> Result<bool>;
    async fn load_templates(&self) -> Result<Vec<TemplateRecord>>;

    // Jobs
    async fn persist_job(&self, job: &JobRecord) -> Result<()>;
    async fn update_job_status(&self, job_id: &str, update: &JobStatusUpdate) -> Result<()>;
    async fn load_jobs(&self) -> Result<Vec<JobRecord>>;
    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>>;
    /// Most recent first.
    async fn get_job_history(&self, template_id: &str, limit: usize) -> Result<Vec<JobRecord>>;
    /// Move every job left `NotStarted` or `Busy` by a previous process to `Error`.
    async fn mark_stale_jobs_failed(&self) -> Result<usize>;

    // Job audit log
    async fn log_job_audit(
        &self,
        job_id: &str,
        event_type: JobAuditEventType,
        duration_ms: Option<i64>,
        details: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<i64>;
    async fn get_job_audit_log(&self, limit: usize, offset: usize) -> Result<Vec<JobAuditEntry>>;
    async fn get_job_audit_log_by_job(
        &self,
        job_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<JobAuditEntry>>;
    async fn cleanup_old_job_audit_entries(&self, before_timestamp: i64) -> Result<usize>;
}
