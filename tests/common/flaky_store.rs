use anyhow::{bail, Result};
use async_trait::async_trait;
use harvest_jobs::job_store::{
    JobAuditEntry, JobAuditEventType, JobRecord, JobStatusUpdate, JobStore, TemplateRecord,
    TemplateStatus,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Store wrapper whose status writes fail a fixed number of times.
pub struct FlakyStore {
    inner: Arc<dyn JobStore>,
    status_failures_left: AtomicU32,
    template_failures_left: AtomicU32,
    pub status_attempts: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn JobStore>, status_failures: u32) -> Self {
        Self {
            inner,
            status_failures_left: AtomicU32::new(status_failures),
            template_failures_left: AtomicU32::new(0),
            status_attempts: AtomicU32::new(0),
        }
    }

    /// Also fail the next `failures` template status writes.
    pub fn with_template_failures(self, failures: u32) -> Self {
        self.template_failures_left.store(failures, Ordering::SeqCst);
        self
    }
}

fn take_failure(left: &AtomicU32) -> bool {
    left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn persist_template(&self, template: &TemplateRecord) -> Result<()> {
        self.inner.persist_template(template).await
    }

    async fn update_template_status(&self, template_id: &str, status: TemplateStatus) -> Result<()> {
        if take_failure(&self.template_failures_left) {
            bail!("disk I/O error");
        }
        self.inner.update_template_status(template_id, status).await
    }

    async fn delete_template(&self, template_id: &str) -> Result<bool> {
        self.inner.delete_template(template_id).await
    }

    async fn load_templates(&self) -> Result<Vec<TemplateRecord>> {
        self.inner.load_templates().await
    }

    async fn persist_job(&self, job: &JobRecord) -> Result<()> {
        self.inner.persist_job(job).await
    }

    async fn update_job_status(&self, job_id: &str, update: &JobStatusUpdate) -> Result<()> {
        self.status_attempts.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.status_failures_left) {
            bail!("database is locked");
        }
        self.inner.update_job_status(job_id, update).await
    }

    async fn load_jobs(&self) -> Result<Vec<JobRecord>> {
        self.inner.load_jobs().await
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        self.inner.get_job(job_id).await
    }

    async fn get_job_history(&self, template_id: &str, limit: usize) -> Result<Vec<JobRecord>> {
        self.inner.get_job_history(template_id, limit).await
    }

    async fn mark_stale_jobs_failed(&self) -> Result<usize> {
        self.inner.mark_stale_jobs_failed().await
    }

    async fn log_job_audit(
        &self,
        job_id: &str,
        event_type: JobAuditEventType,
        duration_ms: Option<i64>,
        details: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<i64> {
        self.inner
            .log_job_audit(job_id, event_type, duration_ms, details, error)
            .await
    }

    async fn get_job_audit_log(&self, limit: usize, offset: usize) -> Result<Vec<JobAuditEntry>> {
        self.inner.get_job_audit_log(limit, offset).await
    }

    async fn get_job_audit_log_by_job(
        &self,
        job_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<JobAuditEntry>> {
        self.inner
            .get_job_audit_log_by_job(job_id, limit, offset)
            .await
    }

    async fn cleanup_old_job_audit_entries(&self, before_timestamp: i64) -> Result<usize> {
        self.inner.cleanup_old_job_audit_entries(before_timestamp).await
    }
}
