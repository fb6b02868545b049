//! Background job orchestration.
//!
//! Templates describe recurring or on-demand work. Invoking a template creates a
//! job, which the execution queue runs one at a time in FIFO order. Observers
//! follow a running job through its task's progress channel.

pub mod audit_logger;
pub mod context;
pub mod error;
pub mod function;
pub mod handle;
pub mod job;
pub mod jobs;
pub mod progress;
pub mod queue;
pub mod registry;
pub mod resilience;
pub mod scheduler;
pub mod task;
pub mod template;

pub use audit_logger::JobAuditLogger;
pub use context::JobContext;
pub use error::JobError;
pub use function::{FnJobFunction, FunctionRegistry, JobFunction};
pub use handle::{JobRunInfo, JobSummary, JobsHandle, TemplateKindInfo, TemplateSummary};
pub use job::Job;
pub use progress::{EventKind, ListenerId, ProgressChannel, StatusEvent, TaskEvent};
pub use queue::ExecutionQueue;
pub use registry::TemplateRegistry;
pub use resilience::{with_duration, with_retry, Retried, RetryPolicy, Timed};
pub use scheduler::{should_trigger, MinuteScheduler};
pub use task::{Task, TaskSettings};
pub use template::JobTemplate;
