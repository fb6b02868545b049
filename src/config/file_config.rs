use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_path: Option<String>,
    pub metrics_port: Option<u16>,
    pub scheduler_enabled: Option<bool>,

    // Feature configs
    pub store_retry: Option<StoreRetryConfig>,
    pub tasks: Option<TasksConfig>,
    pub audit: Option<AuditConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct StoreRetryConfig {
    pub max_retries: Option<u32>,
    pub wait_millis: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct TasksConfig {
    /// Level progress updates are logged at: "trace", "debug", "info", "warn", "error".
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AuditConfig {
    pub retention_days: Option<u64>,
    /// Provision the periodic audit log cleanup template at startup.
    pub cleanup_template: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_file() {
        let config: FileConfig = toml::from_str(
            r#"
            db_path = "/var/lib/harvest/jobs.db"
            metrics_port = 9200
            scheduler_enabled = false

            [store_retry]
            max_retries = 5
            wait_millis = 250

            [tasks]
            log_level = "debug"

            [audit]
            retention_days = 14
            cleanup_template = true
            "#,
        )
        .unwrap();

        assert_eq!(config.db_path.as_deref(), Some("/var/lib/harvest/jobs.db"));
        assert_eq!(config.metrics_port, Some(9200));
        assert_eq!(config.scheduler_enabled, Some(false));
        let retry = config.store_retry.unwrap();
        assert_eq!(retry.max_retries, Some(5));
        assert_eq!(retry.wait_millis, Some(250));
        assert_eq!(config.tasks.unwrap().log_level.as_deref(), Some("debug"));
        let audit = config.audit.unwrap();
        assert_eq!(audit.retention_days, Some(14));
        assert_eq!(audit.cleanup_template, Some(true));
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert!(config.db_path.is_none());
        assert!(config.store_retry.is_none());
        assert!(config.audit.is_none());
    }
}
