//! Built-in job functions.

pub mod audit_log_cleanup;

pub use audit_log_cleanup::{ensure_cleanup_template, AuditLogCleanupJob, AUDIT_LOG_CLEANUP_ID};
