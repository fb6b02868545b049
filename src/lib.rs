//! Harvest jobs library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod background_jobs;
pub mod config;
pub mod job_store;
pub mod server;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use background_jobs::{ExecutionQueue, FunctionRegistry, JobError, JobsHandle, TemplateRegistry};
pub use job_store::{JobStore, SqliteJobStore};
