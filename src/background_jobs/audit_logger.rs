//! Job audit logging utilities.
//!
//! Audit writes never fail a job: errors are logged and dropped.

use crate::job_store::{JobAuditEventType, JobStore};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Writes the audit trail of one job execution.
pub struct JobAuditLogger {
    store: Arc<dyn JobStore>,
    job_id: String,
    start_time: Instant,
}

impl JobAuditLogger {
    pub fn new(store: Arc<dyn JobStore>, job_id: &str) -> Self {
        Self {
            store,
            job_id: job_id.to_string(),
            start_time: Instant::now(),
        }
    }

    async fn log(
        &self,
        event_type: JobAuditEventType,
        duration_ms: Option<i64>,
        details: Option<&Value>,
        error: Option<&str>,
    ) {
        if let Err(e) = self
            .store
            .log_job_audit(&self.job_id, event_type.clone(), duration_ms, details, error)
            .await
        {
            warn!(
                "Failed to write {} audit entry for job {}: {:#}",
                event_type.as_str(),
                self.job_id,
                e
            );
        }
    }

    pub async fn log_started(&self, details: Option<Value>) {
        self.log(JobAuditEventType::Started, None, details.as_ref(), None)
            .await;
    }

    pub async fn log_completed(&self, details: Option<Value>) {
        let duration_ms = self.elapsed_ms();
        self.log(
            JobAuditEventType::Completed,
            Some(duration_ms),
            details.as_ref(),
            None,
        )
        .await;
    }

    pub async fn log_failed(&self, error: &str, details: Option<Value>) {
        let duration_ms = self.elapsed_ms();
        self.log(
            JobAuditEventType::Failed,
            Some(duration_ms),
            details.as_ref(),
            Some(error),
        )
        .await;
    }

    pub async fn log_progress(&self, details: Value) {
        self.log(JobAuditEventType::Progress, None, Some(&details), None)
            .await;
    }

    /// Milliseconds since this logger was created.
    pub fn elapsed_ms(&self) -> i64 {
        self.start_time.elapsed().as_millis() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_store::SqliteJobStore;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_logs_full_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn JobStore> =
            Arc::new(SqliteJobStore::new(temp_dir.path().join("jobs.db")).unwrap());

        let logger = JobAuditLogger::new(store.clone(), "job-1");
        logger.log_started(Some(json!({"function_id": "noop"}))).await;
        logger.log_progress(json!({"done": 1, "total": 2})).await;
        logger.log_completed(None).await;

        let entries = store.get_job_audit_log_by_job("job-1", 10, 0).await.unwrap();
        assert_eq!(entries.len(), 3);
        let completed = entries
            .iter()
            .find(|e| e.event_type == JobAuditEventType::Completed)
            .unwrap();
        assert!(completed.duration_ms.is_some());
        let started = entries
            .iter()
            .find(|e| e.event_type == JobAuditEventType::Started)
            .unwrap();
        assert!(started.duration_ms.is_none());
    }
}
