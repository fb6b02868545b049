use super::error::JobError;
use super::job::Job;
use super::queue::ExecutionQueue;
use super::task::{Task, TaskSettings};
use crate::job_store::{JobKind, JobStore, TemplateKind, TemplateRecord, TemplateStatus};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

/// A live template, owned by the registry.
///
/// Everything but the status is fixed at creation. Once deleted, every
/// accessor except `id` and `short_id` fails with [`JobError::Deleted`].
pub struct JobTemplate {
    id: String,
    short_id: String,
    kind: TemplateKind,
    function_id: String,
    created_at: DateTime<Utc>,
    status: Mutex<TemplateStatus>,
    deleted: AtomicBool,
    store: Arc<dyn JobStore>,
    queue: Arc<ExecutionQueue>,
    task_settings: TaskSettings,
}

impl JobTemplate {
    pub(crate) fn from_record(
        record: TemplateRecord,
        store: Arc<dyn JobStore>,
        queue: Arc<ExecutionQueue>,
        task_settings: TaskSettings,
    ) -> Self {
        Self {
            id: record.id,
            short_id: record.short_id,
            kind: record.kind,
            function_id: record.function_id,
            created_at: record.created_at,
            status: Mutex::new(record.status),
            deleted: AtomicBool::new(false),
            store,
            queue,
            task_settings,
        }
    }

    fn ensure_live(&self) -> Result<(), JobError> {
        if self.deleted.load(Ordering::SeqCst) {
            return Err(JobError::Deleted(self.id.clone()));
        }
        Ok(())
    }

    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::SeqCst);
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn short_id(&self) -> &str {
        &self.short_id
    }

    pub fn kind(&self) -> Result<&TemplateKind, JobError> {
        self.ensure_live()?;
        Ok(&self.kind)
    }

    pub fn function_id(&self) -> Result<&str, JobError> {
        self.ensure_live()?;
        Ok(&self.function_id)
    }

    pub fn created_at(&self) -> Result<DateTime<Utc>, JobError> {
        self.ensure_live()?;
        Ok(self.created_at)
    }

    fn status_guard(&self) -> MutexGuard<'_, TemplateStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> Result<TemplateStatus, JobError> {
        self.ensure_live()?;
        Ok(*self.status_guard())
    }

    /// Persist `status`, then apply it. A failed write leaves the template untouched.
    pub async fn update_status(&self, status: TemplateStatus) -> Result<(), JobError> {
        self.ensure_live()?;
        self.store
            .update_template_status(&self.id, status)
            .await
            .map_err(JobError::Store)?;
        *self.status_guard() = status;
        info!("Template {} is now {}", self.short_id, status.as_str());
        Ok(())
    }

    /// Adopt a status already persisted elsewhere.
    pub(crate) fn sync_status(&self, status: TemplateStatus) {
        *self.status_guard() = status;
    }

    /// Create a job for this template and queue it. Returns without waiting for it to run.
    pub async fn invoke(&self, args: Value) -> Result<Arc<Job>, JobError> {
        let status = self.status()?;
        if !status.accepts_invocations() {
            return Err(JobError::Validation(format!(
                "template {} is {} and cannot be invoked",
                self.short_id,
                status.as_str()
            )));
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        let task = Arc::new(Task::new(
            &job_id,
            self.task_settings.log_level,
            Arc::clone(&self.store),
            self.task_settings.store_retry,
        ));
        let job = Arc::new(Job::new(&self.id, &self.function_id, JobKind::Serial, task));

        let record = job.to_record();
        let store = &self.store;
        let record_ref = &record;
        self.task_settings
            .store_retry
            .run(move || store.persist_job(record_ref))
            .await?;
        info!("Template {} created job {}", self.short_id, job.id());

        if status == TemplateStatus::NotStarted {
            if let Err(e) = self.update_status(TemplateStatus::Active).await {
                warn!("Template {} could not be marked active: {}", self.short_id, e);
            }
        }

        self.queue.enqueue(Arc::clone(&job), args)?;
        Ok(job)
    }

    pub fn to_record(&self) -> Result<TemplateRecord, JobError> {
        Ok(TemplateRecord {
            id: self.id.clone(),
            short_id: self.short_id.clone(),
            kind: self.kind()?.clone(),
            status: self.status()?,
            function_id: self.function_id.clone(),
            created_at: self.created_at,
        })
    }
}

impl std::fmt::Debug for JobTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobTemplate")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("function_id", &self.function_id)
            .field("deleted", &self.is_deleted())
            .finish()
    }
}
