use super::progress::ProgressChannel;
use crate::job_store::JobStore;
use serde_json::Value;
use std::sync::Arc;

/// Context handed to a unit-of-work function for one execution.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: String,

    /// Progress channel of the task running this job.
    pub progress: Arc<ProgressChannel>,

    /// Access to job records and the audit log.
    pub store: Arc<dyn JobStore>,
}

impl JobContext {
    pub fn new(job_id: &str, progress: Arc<ProgressChannel>, store: Arc<dyn JobStore>) -> Self {
        Self {
            job_id: job_id.to_string(),
            progress,
            store,
        }
    }

    /// Shorthand for [`ProgressChannel::update`].
    pub fn update(&self, message: impl Into<Value>) {
        self.progress.update(message);
    }

    /// Shorthand for [`ProgressChannel::progress`] without a sub-process.
    pub fn progress(&self, done: u64, total: u64) {
        self.progress.progress(done, total, None, None);
    }
}
