//! Single-concurrency FIFO execution queue.
//!
//! Entries stay in the queue while they run; at most one of them holds an
//! execution handle at any time. Every completion, successful or not, clears
//! the slot and advances to the next entry.

use super::audit_logger::JobAuditLogger;
use super::context::JobContext;
use super::error::JobError;
use super::function::FunctionRegistry;
use super::job::Job;
use super::progress::{EventKind, TaskEvent};
use super::resilience::{with_duration, Timed};
use crate::job_store::{JobStatus, JobStore};
use crate::server::metrics;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

struct QueueEntry {
    job: Arc<Job>,
    args: Value,
    execution: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<QueueEntry>,
    /// Id of the executing job, if any.
    current: Option<String>,
}

pub struct ExecutionQueue {
    state: Mutex<QueueState>,
    /// Jobs whose terminal status has not been recorded yet.
    jobs: Mutex<HashMap<String, Arc<Job>>>,
    functions: Arc<FunctionRegistry>,
    store: Arc<dyn JobStore>,
    idle: Notify,
}

impl ExecutionQueue {
    pub fn new(functions: Arc<FunctionRegistry>, store: Arc<dyn JobStore>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            jobs: Mutex::new(HashMap::new()),
            functions,
            store,
            idle: Notify::new(),
        })
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, Arc<Job>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn functions(&self) -> &Arc<FunctionRegistry> {
        &self.functions
    }

    /// Append a job and schedule a queue advance.
    ///
    /// Returns how many entries were ahead of it, the running one included.
    /// Must be called from within a tokio runtime.
    pub fn enqueue(self: &Arc<Self>, job: Arc<Job>, args: Value) -> Result<usize, JobError> {
        let status = job.status();
        if status != JobStatus::NotStarted {
            return Err(JobError::Validation(format!(
                "job {} is {} and cannot be queued again",
                job.id(),
                status.as_str()
            )));
        }

        let (ahead, depth) = {
            let mut state = self.state();
            if state.entries.iter().any(|e| e.job.id() == job.id()) {
                return Err(JobError::AlreadyQueued(job.id().to_string()));
            }
            let ahead = state.entries.len();
            job.set_queued_ahead(ahead);
            state.entries.push_back(QueueEntry {
                job: Arc::clone(&job),
                args,
                execution: None,
            });
            (ahead, state.entries.len())
        };
        self.jobs().insert(job.id().to_string(), Arc::clone(&job));
        metrics::set_queue_depth(depth);
        info!(
            "Queued job {} ({}) with {} ahead",
            job.id(),
            job.function_id(),
            ahead
        );

        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.advance() });
        Ok(ahead)
    }

    /// Start the oldest entry unless one is already running. Safe to call redundantly.
    fn advance(self: &Arc<Self>) {
        let mut state = self.state();
        if state.current.is_some() {
            return;
        }
        let Some(entry) = state.entries.front_mut() else {
            return;
        };

        let job = Arc::clone(&entry.job);
        let args = std::mem::take(&mut entry.args);
        let queue = Arc::clone(self);
        let running = Arc::clone(&job);
        entry.execution = Some(tokio::spawn(async move {
            queue.execute(running, args).await;
        }));
        state.current = Some(job.id().to_string());
        metrics::set_job_running(true);
    }

    async fn execute(self: Arc<Self>, job: Arc<Job>, args: Value) {
        let started = Instant::now();
        let outcome = self.run(&job, args).await;
        metrics::record_job_execution(job.function_id(), outcome.as_str(), started.elapsed());

        self.jobs().remove(job.id());
        let remaining = {
            let mut state = self.state();
            if let Some(pos) = state.entries.iter().position(|e| e.job.id() == job.id()) {
                state.entries.remove(pos);
            }
            state.current = None;
            state.entries.len()
        };
        metrics::set_job_running(false);
        metrics::set_queue_depth(remaining);
        if remaining == 0 {
            self.idle.notify_waiters();
        }

        self.advance();
    }

    /// Drive one job to a terminal status. Never returns an error: failures end up on the task.
    async fn run(&self, job: &Arc<Job>, args: Value) -> JobStatus {
        let task = job.task();
        let audit = JobAuditLogger::new(Arc::clone(&self.store), job.id());

        if let Err(e) = task.start().await {
            let message = e.to_string();
            error!("Job {} could not be started: {}", job.id(), message);
            if let Err(fail_err) = task.fail(&message).await {
                error!("Job {} error status not recorded: {}", job.id(), fail_err);
            }
            audit.log_failed(&message, None).await;
            return JobStatus::Error;
        }

        info!("Starting job {} ({})", job.id(), job.function_id());
        audit
            .log_started(Some(json!({
                "template_id": job.template_id(),
                "function_id": job.function_id(),
                "args": args.clone(),
            })))
            .await;

        let last_progress = Arc::new(Mutex::new(None::<Value>));
        let sink = Arc::clone(&last_progress);
        let listener = task.on_event(EventKind::Progress, move |event| {
            if let TaskEvent::Progress {
                done,
                total,
                sub_process_id,
                ..
            } = event
            {
                *sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(json!({
                    "done": done,
                    "total": total,
                    "sub_process_id": sub_process_id,
                }));
            }
        });

        let result = self.call_function(job, args).await;

        task.off_event(EventKind::Progress, listener);
        let summary = last_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(summary) = summary {
            audit.log_progress(summary).await;
        }

        let message = match result {
            Ok(timed) => match task.finish(timed.result.clone()).await {
                Ok(()) => {
                    info!(
                        "Job {} finished in {}ms",
                        job.id(),
                        timed.duration_ms
                    );
                    audit
                        .log_completed(Some(json!({ "result": timed.result })))
                        .await;
                    return JobStatus::Finished;
                }
                Err(e) => format!("Failed to record completion: {}", e),
            },
            Err(e) => e.to_string(),
        };

        warn!("Job {} failed: {}", job.id(), message);
        if let Err(fail_err) = task.fail(&message).await {
            error!("Job {} error status not recorded: {}", job.id(), fail_err);
        }
        audit.log_failed(&message, None).await;
        JobStatus::Error
    }

    async fn call_function(&self, job: &Job, args: Value) -> Result<Timed<Value>, JobError> {
        let function = self.functions.resolve(job.function_id())?;
        let ctx = JobContext::new(
            job.id(),
            Arc::clone(job.task().progress()),
            Arc::clone(&self.store),
        );

        // Own task so a panicking function surfaces as a JoinError.
        let handle =
            tokio::spawn(async move { with_duration(|| function.execute(&ctx, args)).await });

        match handle.await {
            Ok(Ok(timed)) => Ok(timed),
            Ok(Err(e)) => Err(JobError::Execution(format!("{:#}", e))),
            Err(join_error) if join_error.is_panic() => Err(JobError::Execution(format!(
                "function panicked: {}",
                panic_message(join_error.into_panic())
            ))),
            Err(join_error) => Err(JobError::Execution(join_error.to_string())),
        }
    }

    /// Jobs still in the queue, oldest first. The running one, if any, comes first.
    pub fn pending_jobs(&self) -> Vec<Arc<Job>> {
        self.state()
            .entries
            .iter()
            .map(|e| Arc::clone(&e.job))
            .collect()
    }

    /// A job that has not yet reached a recorded terminal status.
    pub fn get_job(&self, job_id: &str) -> Option<Arc<Job>> {
        self.jobs().get(job_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_job_id(&self) -> Option<String> {
        self.state().current.clone()
    }

    /// Number of entries holding an execution handle. Never more than one.
    pub fn executing_count(&self) -> usize {
        self.state()
            .entries
            .iter()
            .filter(|e| e.execution.is_some())
            .count()
    }

    pub fn is_idle(&self) -> bool {
        let state = self.state();
        state.entries.is_empty() && state.current.is_none()
    }

    /// Wait until no entry is queued or running.
    pub async fn wait_until_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
