use thiserror::Error;

/// Errors surfaced by the template registry, the execution queue and job tasks.
#[derive(Debug, Error)]
pub enum JobError {
    /// Bad arguments to `create`, `invoke` or `enqueue`. Never enters the queue.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Job {0} is already queued")]
    AlreadyQueued(String),

    #[error("Template registry used before load()")]
    NotInitialized,

    #[error("This resource has been deleted: template {0}")]
    Deleted(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid status transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    /// A datastore call failed, after any retries its call site applies.
    #[error("Store error: {0:#}")]
    Store(#[from] anyhow::Error),

    /// The unit-of-work function returned an error or panicked.
    #[error("Execution failed: {0}")]
    Execution(String),
}
