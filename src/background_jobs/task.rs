use super::error::JobError;
use super::progress::{EventKind, ListenerId, ProgressChannel, StatusEvent, TaskEvent};
use super::resilience::RetryPolicy;
use crate::job_store::{JobStatus, JobStatusUpdate, JobStore};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, error, Level};

/// Settings applied to every task a template creates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskSettings {
    /// Level at which progress `update` messages are logged.
    pub log_level: Level,
    /// Retry policy for status writes.
    pub store_retry: RetryPolicy,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            store_retry: RetryPolicy::default(),
        }
    }
}

/// Live execution context of a job. Shares the job's id and owns its progress channel.
///
/// Every status change is written to the store before the in-memory status
/// changes and before the `status` event goes out.
pub struct Task {
    id: String,
    log_level: Level,
    status: Mutex<JobStatus>,
    progress: Arc<ProgressChannel>,
    store: Arc<dyn JobStore>,
    store_retry: RetryPolicy,
}

impl Task {
    pub fn new(
        id: &str,
        log_level: Level,
        store: Arc<dyn JobStore>,
        store_retry: RetryPolicy,
    ) -> Self {
        Self {
            id: id.to_string(),
            log_level,
            status: Mutex::new(JobStatus::NotStarted),
            progress: Arc::new(ProgressChannel::new(id, log_level)),
            store,
            store_retry,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn log_level(&self) -> Level {
        self.log_level
    }

    fn status_guard(&self) -> MutexGuard<'_, JobStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> JobStatus {
        *self.status_guard()
    }

    pub fn progress(&self) -> &Arc<ProgressChannel> {
        &self.progress
    }

    pub fn on_event<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&TaskEvent) + Send + Sync + 'static,
    {
        self.progress.on_event(kind, listener)
    }

    pub fn off_event(&self, kind: EventKind, id: ListenerId) -> bool {
        self.progress.off_event(kind, id)
    }

    pub fn subscribe_stream(&self) -> broadcast::Receiver<TaskEvent> {
        self.progress.subscribe_stream()
    }

    /// NotStarted -> Busy, emitting `start`.
    pub(crate) async fn start(&self) -> Result<(), JobError> {
        self.transition(JobStatusUpdate::busy(), StatusEvent::Start)
            .await
    }

    /// Busy -> Finished, emitting `return` with the function result.
    pub(crate) async fn finish(&self, result: Value) -> Result<(), JobError> {
        self.transition(
            JobStatusUpdate::finished(result.clone()),
            StatusEvent::Return { result },
        )
        .await
    }

    /// NotStarted/Busy -> Error, emitting `error`.
    ///
    /// The in-memory status becomes Error even if the store rejects the write,
    /// so the job is never left looking busy.
    pub(crate) async fn fail(&self, message: &str) -> Result<(), JobError> {
        self.transition(
            JobStatusUpdate::error(message),
            StatusEvent::Error {
                error: message.to_string(),
            },
        )
        .await
    }

    async fn transition(&self, update: JobStatusUpdate, event: StatusEvent) -> Result<(), JobError> {
        let current = self.status();
        if !current.can_transition_to(update.status) {
            return Err(JobError::InvalidTransition {
                job_id: self.id.clone(),
                from: current.as_str(),
                to: update.status.as_str(),
            });
        }

        let store = &self.store;
        let job_id = self.id.as_str();
        let update_ref = &update;
        let persisted = self
            .store_retry
            .run(move || store.update_job_status(job_id, update_ref))
            .await;

        let mut store_error = None;
        if let Err(e) = persisted {
            if update.status != JobStatus::Error {
                return Err(JobError::Store(e));
            }
            error!(
                "Failed to persist error status of job {}: {:#}",
                self.id, e
            );
            store_error = Some(e);
        }

        *self.status_guard() = update.status;
        debug!("Job {} is now {}", self.id, update.status.as_str());
        self.progress.status(event);

        match store_error {
            Some(e) => Err(JobError::Store(e)),
            None => Ok(()),
        }
    }
}
