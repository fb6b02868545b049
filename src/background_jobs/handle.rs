use super::error::JobError;
use super::queue::ExecutionQueue;
use super::registry::TemplateRegistry;
use super::task::Task;
use super::template::JobTemplate;
use super::job::Job;
use crate::job_store::{
    format_days, format_time_of_invocation, JobAuditEntry, JobRecord, JobStore, TemplateKind,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Serializable template information for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateSummary {
    pub id: String,
    pub short_id: String,
    pub kind: TemplateKindInfo,
    pub status: String,
    pub function_id: String,
    pub created_at: String,
}

/// Serializable kind payload.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateKindInfo {
    #[serde(rename = "type")]
    pub kind_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_of_invocation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_of_invocation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_path: Option<String>,
}

impl From<&TemplateKind> for TemplateKindInfo {
    fn from(kind: &TemplateKind) -> Self {
        match kind {
            TemplateKind::Periodic {
                time_of_invocation,
                days_of_invocation,
            } => TemplateKindInfo {
                kind_type: kind.template_type().as_str().to_string(),
                time_of_invocation: Some(format_time_of_invocation(time_of_invocation)),
                days_of_invocation: Some(format_days(days_of_invocation)),
                url_path: None,
            },
            TemplateKind::RestInvoked { url_path } => TemplateKindInfo {
                kind_type: kind.template_type().as_str().to_string(),
                url_path: Some(url_path.clone()),
                time_of_invocation: None,
                days_of_invocation: None,
            },
        }
    }
}

impl TryFrom<&JobTemplate> for TemplateSummary {
    type Error = JobError;

    fn try_from(template: &JobTemplate) -> Result<Self, Self::Error> {
        Ok(TemplateSummary {
            id: template.id().to_string(),
            short_id: template.short_id().to_string(),
            kind: template.kind()?.into(),
            status: template.status()?.as_str().to_string(),
            function_id: template.function_id()?.to_string(),
            created_at: template.created_at()?.to_rfc3339(),
        })
    }
}

/// Serializable live job information.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: String,
    pub template_id: String,
    pub function_id: String,
    pub kind: String,
    pub status: String,
    pub created_at: String,
    /// Entries ahead of this one; 0 for the running job.
    pub position: usize,
}

impl JobSummary {
    fn new(job: &Job, position: usize) -> Self {
        JobSummary {
            id: job.id().to_string(),
            template_id: job.template_id().to_string(),
            function_id: job.function_id().to_string(),
            kind: job.kind().as_str().to_string(),
            status: job.status().as_str().to_string(),
            created_at: job.created_at().to_rfc3339(),
            position,
        }
    }
}

/// Serializable persisted job run.
#[derive(Debug, Clone, Serialize)]
pub struct JobRunInfo {
    pub id: String,
    pub template_id: String,
    pub function_id: String,
    pub status: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub error_message: Option<String>,
    pub result: Option<Value>,
}

impl From<JobRecord> for JobRunInfo {
    fn from(record: JobRecord) -> Self {
        JobRunInfo {
            id: record.id,
            template_id: record.template_id,
            function_id: record.function_id,
            status: record.status.as_str().to_string(),
            created_at: record.created_at.to_rfc3339(),
            started_at: record.started_at.map(|dt| dt.to_rfc3339()),
            finished_at: record.finished_at.map(|dt| dt.to_rfc3339()),
            error_message: record.error_message,
            result: record.result,
        }
    }
}

/// Entry point for an HTTP or CLI shell.
#[derive(Clone)]
pub struct JobsHandle {
    registry: Arc<TemplateRegistry>,
    queue: Arc<ExecutionQueue>,
    store: Arc<dyn JobStore>,
}

impl JobsHandle {
    pub fn new(registry: Arc<TemplateRegistry>, store: Arc<dyn JobStore>) -> Self {
        Self {
            queue: Arc::clone(registry.queue()),
            registry,
            store,
        }
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        &self.registry
    }

    pub fn list_job_templates(&self) -> Result<Vec<TemplateSummary>, JobError> {
        self.registry
            .list()?
            .iter()
            .map(|t| TemplateSummary::try_from(t.as_ref()))
            .collect()
    }

    /// Queued and running jobs, in execution order.
    pub fn list_jobs(&self) -> Vec<JobSummary> {
        self.queue
            .pending_jobs()
            .iter()
            .enumerate()
            .map(|(position, job)| JobSummary::new(job, position))
            .collect()
    }

    /// The live task of a queued or running job.
    pub fn get_task(&self, job_id: &str) -> Option<Arc<Task>> {
        self.queue.get_job(job_id).map(|job| Arc::clone(job.task()))
    }

    pub async fn invoke_rest_template(
        &self,
        url_path: &str,
        args: Value,
    ) -> Result<JobSummary, JobError> {
        let job = self.registry.invoke_rest_template(url_path, args).await?;
        let position = job.queued_ahead().ok_or_else(|| {
            JobError::Validation(format!("job {} was not queued", job.id()))
        })?;
        Ok(JobSummary::new(&job, position))
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobRunInfo>, JobError> {
        Ok(self.store.get_job(job_id).await?.map(JobRunInfo::from))
    }

    /// Persisted runs of a template (id or short id), most recent first.
    pub async fn get_job_history(
        &self,
        template: &str,
        limit: usize,
    ) -> Result<Vec<JobRunInfo>, JobError> {
        let template_id = match self.registry.get_by_id(template)? {
            Some(t) => t.id().to_string(),
            None => template.to_string(),
        };
        let history = self.store.get_job_history(&template_id, limit).await?;
        Ok(history.into_iter().map(JobRunInfo::from).collect())
    }

    pub async fn get_job_audit_log(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<JobAuditEntry>, JobError> {
        Ok(self.store.get_job_audit_log(limit, offset).await?)
    }

    pub async fn get_job_audit_log_by_job(
        &self,
        job_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<JobAuditEntry>, JobError> {
        Ok(self
            .store
            .get_job_audit_log_by_job(job_id, limit, offset)
            .await?)
    }
}
