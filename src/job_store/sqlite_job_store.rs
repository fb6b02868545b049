use super::schema::JOB_STORE_VERSIONED_SCHEMAS;
use super::{
    format_days, format_time_of_invocation, parse_days, parse_time_of_invocation,
    JobAuditEntry, JobAuditEventType, JobKind, JobRecord, JobStatus, JobStatusUpdate, JobStore,
    TemplateKind, TemplateRecord, TemplateStatus, TemplateType,
};
use crate::sqlite_persistence::open_versioned;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

const JOB_COLUMNS: &str = "id, template_id, function_id, kind, status, created_at, \
                           started_at, finished_at, error_message, result";
const TEMPLATE_COLUMNS: &str = "id, short_id, kind, status, function_id, \
                                time_of_invocation, days_of_invocation, url_path, created_at";

pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

/// Raw template row; converted to a [`TemplateRecord`] once the kind payload checks out.
struct TemplateRow {
    id: String,
    short_id: String,
    kind: String,
    status: String,
    function_id: String,
    time_of_invocation: Option<String>,
    days_of_invocation: Option<String>,
    url_path: Option<String>,
    created_at: String,
}

impl TemplateRow {
    fn into_record(self) -> Result<TemplateRecord> {
        let template_type = TemplateType::parse(&self.kind)
            .with_context(|| format!("Template {} has unknown kind '{}'", self.id, self.kind))?;
        let kind = match template_type {
            TemplateType::Periodic => {
                let time = self
                    .time_of_invocation
                    .as_deref()
                    .and_then(parse_time_of_invocation)
                    .with_context(|| format!("Template {} has no valid time_of_invocation", self.id))?;
                let days = self
                    .days_of_invocation
                    .as_deref()
                    .and_then(parse_days)
                    .with_context(|| format!("Template {} has no valid days_of_invocation", self.id))?;
                TemplateKind::periodic(time, days)
            }
            TemplateType::RestInvoked => {
                let url_path = self
                    .url_path
                    .with_context(|| format!("Template {} has no url_path", self.id))?;
                TemplateKind::RestInvoked { url_path }
            }
        };
        let status = TemplateStatus::parse(&self.status)
            .with_context(|| format!("Template {} has unknown status '{}'", self.id, self.status))?;

        Ok(TemplateRecord {
            id: self.id,
            short_id: self.short_id,
            kind,
            status,
            function_id: self.function_id,
            created_at: parse_datetime(&self.created_at),
        })
    }
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

impl SqliteJobStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), JOB_STORE_VERSIONED_SCHEMAS, "job store")?;
        info!("Job store ready at {:?}", db_path.as_ref());

        Ok(SqliteJobStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Job store connection lock poisoned"))
    }

    fn row_to_template(row: &rusqlite::Row) -> rusqlite::Result<TemplateRow> {
        Ok(TemplateRow {
            id: row.get("id")?,
            short_id: row.get("short_id")?,
            kind: row.get("kind")?,
            status: row.get("status")?,
            function_id: row.get("function_id")?,
            time_of_invocation: row.get("time_of_invocation")?,
            days_of_invocation: row.get("days_of_invocation")?,
            url_path: row.get("url_path")?,
            created_at: row.get("created_at")?,
        })
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<JobRecord> {
        let status_str: String = row.get("status")?;
        let kind_str: String = row.get("kind")?;
        let created_at_str: String = row.get("created_at")?;
        let result_str: Option<String> = row.get("result")?;

        Ok(JobRecord {
            id: row.get("id")?,
            template_id: row.get("template_id")?,
            function_id: row.get("function_id")?,
            kind: JobKind::parse(&kind_str).unwrap_or(JobKind::Serial),
            status: JobStatus::parse(&status_str).unwrap_or(JobStatus::Error),
            created_at: parse_datetime(&created_at_str),
            started_at: parse_optional_datetime(row.get("started_at")?),
            finished_at: parse_optional_datetime(row.get("finished_at")?),
            error_message: row.get("error_message")?,
            result: result_str.and_then(|s| serde_json::from_str(&s).ok()),
        })
    }

    fn row_to_audit_entry(row: &rusqlite::Row) -> rusqlite::Result<JobAuditEntry> {
        let event_type_str: String = row.get("event_type")?;
        let event_type =
            JobAuditEventType::parse(&event_type_str).unwrap_or(JobAuditEventType::Progress);

        let timestamp_str: String = row.get("timestamp")?;
        let timestamp = parse_datetime(&timestamp_str).timestamp();

        let details_str: Option<String> = row.get("details")?;
        let details = details_str.and_then(|s| serde_json::from_str(&s).ok());

        Ok(JobAuditEntry {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            event_type,
            timestamp,
            duration_ms: row.get("duration_ms")?,
            details,
            error: row.get("error")?,
        })
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn persist_template(&self, template: &TemplateRecord) -> Result<()> {
        let conn = self.conn()?;
        let (time_of_invocation, days_of_invocation, url_path) = match &template.kind {
            TemplateKind::Periodic {
                time_of_invocation,
                days_of_invocation,
            } => (
                Some(format_time_of_invocation(time_of_invocation)),
                Some(format_days(days_of_invocation)),
                None,
            ),
            TemplateKind::RestInvoked { url_path } => (None, None, Some(url_path.clone())),
        };

        conn.execute(
            &format!(
                "INSERT INTO job_templates ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                TEMPLATE_COLUMNS
            ),
            params![
                template.id,
                template.short_id,
                template.kind.template_type().as_str(),
                template.status.as_str(),
                template.function_id,
                time_of_invocation,
                days_of_invocation,
                url_path,
                format_datetime(&template.created_at),
            ],
        )
        .with_context(|| format!("Failed to persist template {}", template.id))?;
        Ok(())
    }

    async fn update_template_status(
        &self,
        template_id: &str,
        status: TemplateStatus,
    ) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE job_templates SET status = ?1 WHERE id = ?2",
            params![status.as_str(), template_id],
        )?;
        if updated == 0 {
            bail!("Template {} not found", template_id);
        }
        Ok(())
    }

    async fn delete_template(&self, template_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM job_templates WHERE id = ?1",
            params![template_id],
        )?;
        Ok(deleted > 0)
    }

    async fn load_templates(&self) -> Result<Vec<TemplateRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM job_templates ORDER BY created_at ASC",
            TEMPLATE_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], Self::row_to_template)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(TemplateRow::into_record).collect()
    }

    async fn persist_job(&self, job: &JobRecord) -> Result<()> {
        let conn = self.conn()?;
        let result_str = job.result.as_ref().map(|r| r.to_string());

        conn.execute(
            &format!(
                "INSERT INTO jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                JOB_COLUMNS
            ),
            params![
                job.id,
                job.template_id,
                job.function_id,
                job.kind.as_str(),
                job.status.as_str(),
                format_datetime(&job.created_at),
                job.started_at.as_ref().map(format_datetime),
                job.finished_at.as_ref().map(format_datetime),
                job.error_message,
                result_str,
            ],
        )
        .with_context(|| format!("Failed to persist job {}", job.id))?;
        Ok(())
    }

    async fn update_job_status(&self, job_id: &str, update: &JobStatusUpdate) -> Result<()> {
        let conn = self.conn()?;
        let at = format_datetime(&update.at);
        let result_str = update.result.as_ref().map(|r| r.to_string());

        let updated = if update.status == JobStatus::Busy {
            conn.execute(
                "UPDATE jobs SET status = ?1, started_at = ?2 WHERE id = ?3",
                params![update.status.as_str(), at, job_id],
            )?
        } else if update.status.is_terminal() {
            conn.execute(
                "UPDATE jobs SET status = ?1, finished_at = ?2, error_message = ?3, result = ?4
                 WHERE id = ?5",
                params![
                    update.status.as_str(),
                    at,
                    update.error_message,
                    result_str,
                    job_id
                ],
            )?
        } else {
            conn.execute(
                "UPDATE jobs SET status = ?1 WHERE id = ?2",
                params![update.status.as_str(), job_id],
            )?
        };

        if updated == 0 {
            bail!("Job {} not found", job_id);
        }
        Ok(())
    }

    async fn load_jobs(&self) -> Result<Vec<JobRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs ORDER BY created_at ASC, rowid ASC",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map([], Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS))?;
        let job = stmt
            .query_row(params![job_id], Self::row_to_job)
            .optional()?;
        Ok(job)
    }

    async fn get_job_history(&self, template_id: &str, limit: usize) -> Result<Vec<JobRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE template_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(params![template_id, limit as i64], Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    async fn mark_stale_jobs_failed(&self) -> Result<usize> {
        let conn = self.conn()?;
        let now = format_datetime(&Utc::now());

        let count = conn.execute(
            "UPDATE jobs SET status = ?1, finished_at = ?2, error_message = ?3
             WHERE status IN (?4, ?5)",
            params![
                JobStatus::Error.as_str(),
                now,
                "Job was interrupted (process restart)",
                JobStatus::NotStarted.as_str(),
                JobStatus::Busy.as_str()
            ],
        )?;
        Ok(count)
    }

    async fn log_job_audit(
        &self,
        job_id: &str,
        event_type: JobAuditEventType,
        duration_ms: Option<i64>,
        details: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        let now = format_datetime(&Utc::now());
        let details_str = details.map(|d| d.to_string());

        conn.execute(
            "INSERT INTO job_audit_log (job_id, event_type, timestamp, duration_ms, details, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                job_id,
                event_type.as_str(),
                now,
                duration_ms,
                details_str,
                error
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn get_job_audit_log(&self, limit: usize, offset: usize) -> Result<Vec<JobAuditEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, event_type, timestamp, duration_ms, details, error
             FROM job_audit_log
             ORDER BY timestamp DESC, id DESC
             LIMIT ?1 OFFSET ?2",
        )?;
        let entries = stmt
            .query_map(
                params![limit as i64, offset as i64],
                Self::row_to_audit_entry,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    async fn get_job_audit_log_by_job(
        &self,
        job_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<JobAuditEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, event_type, timestamp, duration_ms, details, error
             FROM job_audit_log
             WHERE job_id = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2 OFFSET ?3",
        )?;
        let entries = stmt
            .query_map(
                params![job_id, limit as i64, offset as i64],
                Self::row_to_audit_entry,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    async fn cleanup_old_job_audit_entries(&self, before_timestamp: i64) -> Result<usize> {
        let conn = self.conn()?;
        let cutoff = DateTime::from_timestamp(before_timestamp, 0)
            .map(|dt| format_datetime(&dt))
            .with_context(|| format!("Invalid cutoff timestamp {}", before_timestamp))?;

        let deleted = conn.execute(
            "DELETE FROM job_audit_log WHERE timestamp < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }
}
