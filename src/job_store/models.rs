use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

// =============================================================================
// Job templates
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateStatus {
    NotStarted,
    Active,
    Finished,
    Inactive,
}

impl TemplateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateStatus::NotStarted => "not_started",
            TemplateStatus::Active => "active",
            TemplateStatus::Finished => "finished",
            TemplateStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(TemplateStatus::NotStarted),
            "active" => Some(TemplateStatus::Active),
            "finished" => Some(TemplateStatus::Finished),
            "inactive" => Some(TemplateStatus::Inactive),
            _ => None,
        }
    }

    /// Inactive and finished templates are neither scheduled nor invocable.
    pub fn accepts_invocations(&self) -> bool {
        matches!(self, TemplateStatus::NotStarted | TemplateStatus::Active)
    }
}

/// Discriminant of [`TemplateKind`], used for filtering and persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateType {
    Periodic,
    RestInvoked,
}

impl TemplateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateType::Periodic => "periodic",
            TemplateType::RestInvoked => "rest_invoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "periodic" => Some(TemplateType::Periodic),
            "rest_invoked" => Some(TemplateType::RestInvoked),
            _ => None,
        }
    }
}

/// How a template gets triggered, with the data each trigger needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateKind {
    /// Fired by the minute scheduler on matching weekdays at a minute-aligned time.
    Periodic {
        time_of_invocation: NaiveTime,
        days_of_invocation: Vec<Weekday>,
    },
    /// Fired explicitly through an external call addressed by `url_path`.
    RestInvoked { url_path: String },
}

impl TemplateKind {
    pub fn template_type(&self) -> TemplateType {
        match self {
            TemplateKind::Periodic { .. } => TemplateType::Periodic,
            TemplateKind::RestInvoked { .. } => TemplateType::RestInvoked,
        }
    }

    /// Build a periodic kind with its weekdays deduplicated and sorted Monday first.
    pub fn periodic(time_of_invocation: NaiveTime, days: impl IntoIterator<Item = Weekday>) -> Self {
        TemplateKind::Periodic {
            time_of_invocation,
            days_of_invocation: normalize_days(days),
        }
    }

    pub fn rest_invoked(url_path: impl Into<String>) -> Self {
        TemplateKind::RestInvoked {
            url_path: url_path.into(),
        }
    }
}

pub fn normalize_days(days: impl IntoIterator<Item = Weekday>) -> Vec<Weekday> {
    let mut days: Vec<Weekday> = days.into_iter().collect();
    days.sort_by_key(|d| d.num_days_from_monday());
    days.dedup();
    days
}

/// Formats weekdays as `mon,tue,...`.
pub fn format_days(days: &[Weekday]) -> String {
    days.iter()
        .map(|d| d.to_string().to_lowercase())
        .collect::<Vec<_>>()
        .join(",")
}

/// Parses a comma-separated weekday list. Accepts short or long names in any case.
pub fn parse_days(s: &str) -> Option<Vec<Weekday>> {
    if s.trim().is_empty() {
        return Some(Vec::new());
    }
    let days = s
        .split(',')
        .map(|part| part.trim().parse::<Weekday>().ok())
        .collect::<Option<Vec<_>>>()?;
    Some(normalize_days(days))
}

pub fn format_time_of_invocation(time: &NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

pub fn parse_time_of_invocation(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}

#[derive(Debug, Clone)]
pub struct TemplateRecord {
    pub id: String,
    /// Alternate identifier, the first 8 characters of `id`.
    pub short_id: String,
    pub kind: TemplateKind,
    pub status: TemplateStatus,
    pub function_id: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Jobs
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Serial,
    Parallel,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Serial => "serial",
            JobKind::Parallel => "parallel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "serial" => Some(JobKind::Serial),
            "parallel" => Some(JobKind::Parallel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    NotStarted,
    Busy,
    Finished,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::NotStarted => "not_started",
            JobStatus::Busy => "busy",
            JobStatus::Finished => "finished",
            JobStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(JobStatus::NotStarted),
            "busy" => Some(JobStatus::Busy),
            "finished" => Some(JobStatus::Finished),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Error)
    }

    /// Status only moves forward: NotStarted -> Busy -> {Finished | Error}.
    /// NotStarted -> Error is allowed for jobs that fail before their function starts.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::NotStarted, JobStatus::Busy)
                | (JobStatus::NotStarted, JobStatus::Error)
                | (JobStatus::Busy, JobStatus::Finished)
                | (JobStatus::Busy, JobStatus::Error)
        )
    }
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub template_id: String,
    pub function_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
}

// =============================================================================
// Job audit log
// =============================================================================

/// Event types for job audit log entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAuditEventType {
    Started,
    Completed,
    Failed,
    Progress,
}

impl JobAuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobAuditEventType::Started => "started",
            JobAuditEventType::Completed => "completed",
            JobAuditEventType::Failed => "failed",
            JobAuditEventType::Progress => "progress",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "started" => Some(JobAuditEventType::Started),
            "completed" => Some(JobAuditEventType::Completed),
            "failed" => Some(JobAuditEventType::Failed),
            "progress" => Some(JobAuditEventType::Progress),
            _ => None,
        }
    }
}

/// An entry in the job audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAuditEntry {
    pub id: i64,
    pub job_id: String,
    pub event_type: JobAuditEventType,
    /// Unix timestamp when the event occurred
    pub timestamp: i64,
    pub duration_ms: Option<i64>,
    pub details: Option<serde_json::Value>,
    pub error: Option<String>,
}
