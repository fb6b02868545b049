mod file_config;

pub use file_config::{AuditConfig, FileConfig, StoreRetryConfig, TasksConfig};

use crate::background_jobs::{RetryPolicy, TaskSettings};
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_WAIT_MILLIS: u64 = 500;
pub const DEFAULT_AUDIT_RETENTION_DAYS: u64 = 30;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub metrics_port: u16,
    pub scheduler_enabled: bool,
    pub task_log_level: String,
    pub audit_retention_days: u64,
    pub cleanup_template: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            metrics_port: 9091,
            scheduler_enabled: true,
            task_log_level: "info".to_string(),
            audit_retention_days: DEFAULT_AUDIT_RETENTION_DAYS,
            cleanup_template: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub metrics_port: u16,
    pub scheduler_enabled: bool,
    pub tasks: TaskSettings,
    pub audit: AuditSettings,
}

#[derive(Debug, Clone)]
pub struct AuditSettings {
    pub retention_days: u64,
    pub cleanup_template: bool,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_path must be specified via --db-path or in config file")
            })?;
        if db_path.as_os_str().is_empty() {
            bail!("db_path must not be empty");
        }
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                bail!("Database directory does not exist: {:?}", parent);
            }
        }

        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);
        let scheduler_enabled = file.scheduler_enabled.unwrap_or(cli.scheduler_enabled);

        let retry_file = file.store_retry.unwrap_or_default();
        let store_retry = RetryPolicy::new(
            retry_file.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            Duration::from_millis(retry_file.wait_millis.unwrap_or(DEFAULT_RETRY_WAIT_MILLIS)),
        );

        let level_str = file
            .tasks
            .and_then(|t| t.log_level)
            .unwrap_or_else(|| cli.task_log_level.clone());
        let log_level = parse_log_level(&level_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid task log level: {}", level_str))?;

        let audit_file = file.audit.unwrap_or_default();
        let audit = AuditSettings {
            retention_days: audit_file
                .retention_days
                .unwrap_or(cli.audit_retention_days),
            cleanup_template: audit_file
                .cleanup_template
                .unwrap_or(cli.cleanup_template),
        };
        if audit.cleanup_template && audit.retention_days == 0 {
            bail!("audit retention_days must be at least 1 when the cleanup template is enabled");
        }

        Ok(Self {
            db_path,
            metrics_port,
            scheduler_enabled,
            tasks: TaskSettings {
                log_level,
                store_retry,
            },
            audit,
        })
    }
}

/// Parses a level name, case insensitive.
fn parse_log_level(s: &str) -> Option<Level> {
    s.trim().parse::<Level>().ok()
}
