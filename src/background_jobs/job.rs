use super::task::Task;
use crate::job_store::{JobKind, JobRecord, JobStatus};
use chrono::{DateTime, Utc};
use std::sync::{Arc, OnceLock};

/// One invocation of a template. Its status lives in the paired [`Task`].
pub struct Job {
    id: String,
    kind: JobKind,
    template_id: String,
    function_id: String,
    created_at: DateTime<Utc>,
    task: Arc<Task>,
    /// Entries ahead of this job when it was queued.
    queued_ahead: OnceLock<usize>,
}

impl Job {
    pub fn new(template_id: &str, function_id: &str, kind: JobKind, task: Arc<Task>) -> Self {
        Self {
            id: task.id().to_string(),
            kind,
            template_id: template_id.to_string(),
            function_id: function_id.to_string(),
            created_at: Utc::now(),
            task,
            queued_ahead: OnceLock::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    pub fn function_id(&self) -> &str {
        &self.function_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> JobStatus {
        self.task.status()
    }

    /// How many entries were ahead at the moment this job entered the queue.
    /// `None` until it has been queued.
    pub fn queued_ahead(&self) -> Option<usize> {
        self.queued_ahead.get().copied()
    }

    pub(crate) fn set_queued_ahead(&self, ahead: usize) {
        let _ = self.queued_ahead.set(ahead);
    }

    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    pub fn to_record(&self) -> JobRecord {
        JobRecord {
            id: self.id.clone(),
            template_id: self.template_id.clone(),
            function_id: self.function_id.clone(),
            kind: self.kind,
            status: self.status(),
            created_at: self.created_at,
            started_at: None,
            finished_at: None,
            error_message: None,
            result: None,
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("template_id", &self.template_id)
            .field("function_id", &self.function_id)
            .field("status", &self.status())
            .finish()
    }
}
