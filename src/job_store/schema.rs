//! SQLite schema definitions for the job database.
//!
//! Templates and jobs live here; the queue itself is never persisted.

use crate::sqlite_column;
use crate::sqlite_persistence::{SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Templates and jobs
// =============================================================================

const JOB_TEMPLATES_TABLE_V1: Table = Table {
    name: "job_templates",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true), // UUID
        sqlite_column!("short_id", &SqlType::Text, non_null = true),
        sqlite_column!("kind", &SqlType::Text, non_null = true), // 'periodic' | 'rest_invoked'
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("function_id", &SqlType::Text, non_null = true),
        sqlite_column!("time_of_invocation", &SqlType::Text), // HH:MM, periodic only
        sqlite_column!("days_of_invocation", &SqlType::Text), // mon,tue,..., periodic only
        sqlite_column!("url_path", &SqlType::Text),           // rest_invoked only
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_job_templates_short_id", "short_id"),
        ("idx_job_templates_kind", "kind"),
    ],
};

const JOBS_TABLE_V1: Table = Table {
    name: "jobs",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true), // UUID
        sqlite_column!("template_id", &SqlType::Text, non_null = true),
        sqlite_column!("function_id", &SqlType::Text, non_null = true),
        sqlite_column!("kind", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
        sqlite_column!("started_at", &SqlType::Text),
        sqlite_column!("finished_at", &SqlType::Text),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("result", &SqlType::Text), // JSON
    ],
    indices: &[
        ("idx_jobs_template_id_created", "template_id, created_at DESC"),
        ("idx_jobs_status", "status"),
    ],
};

// =============================================================================
// Version 2 - Job audit log
// =============================================================================

const JOB_AUDIT_LOG_TABLE_V2: Table = Table {
    name: "job_audit_log",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true), // AUTOINCREMENT
        sqlite_column!("job_id", &SqlType::Text, non_null = true),
        sqlite_column!("event_type", &SqlType::Text, non_null = true),
        sqlite_column!("timestamp", &SqlType::Text, non_null = true),
        sqlite_column!("duration_ms", &SqlType::Integer),
        sqlite_column!("details", &SqlType::Text),
        sqlite_column!("error", &SqlType::Text),
    ],
    indices: &[
        ("idx_job_audit_log_job_id", "job_id"),
        ("idx_job_audit_log_timestamp", "timestamp DESC"),
    ],
};

fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE job_audit_log (
            id INTEGER PRIMARY KEY,
            job_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            duration_ms INTEGER,
            details TEXT,
            error TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX idx_job_audit_log_job_id ON job_audit_log(job_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX idx_job_audit_log_timestamp ON job_audit_log(timestamp DESC)",
        [],
    )?;
    Ok(())
}

/// All versioned schemas for the job database.
///
/// Version 1: Templates and jobs
/// Version 2: Job audit log
pub const JOB_STORE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[JOB_TEMPLATES_TABLE_V1, JOBS_TABLE_V1],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            JOB_TEMPLATES_TABLE_V1,
            JOBS_TABLE_V1,
            JOB_AUDIT_LOG_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
];
