use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use harvest_jobs::background_jobs::jobs::{ensure_cleanup_template, AuditLogCleanupJob};
use harvest_jobs::background_jobs::{
    ExecutionQueue, FunctionRegistry, JobsHandle, MinuteScheduler, TemplateRegistry,
};
use harvest_jobs::config::{AppConfig, CliConfig, FileConfig};
use harvest_jobs::job_store::{JobStore, SqliteJobStore};
use harvest_jobs::server::{self, metrics};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the SQLite job store database file.
    #[clap(long, value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Path to a TOML config file. Its values override the CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// Do not run the minute scheduler; templates can still be invoked explicitly.
    #[clap(long)]
    pub no_scheduler: bool,

    /// Level at which job progress updates are logged.
    #[clap(long, default_value = "info")]
    pub task_log_level: String,

    /// Number of days to retain job audit entries.
    #[clap(long, default_value_t = 30)]
    pub audit_retention_days: u64,

    /// Provision the daily audit log cleanup template.
    #[clap(long)]
    pub cleanup_template: bool,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_path: self.db_path.clone(),
            metrics_port: self.metrics_port,
            scheduler_enabled: !self.no_scheduler,
            task_log_level: self.task_log_level.clone(),
            audit_retention_days: self.audit_retention_days,
            cleanup_template: self.cleanup_template,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize tracing")?;

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    info!("Opening job store at {:?}...", config.db_path);
    let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(&config.db_path)?);
    let stale = store.mark_stale_jobs_failed().await?;
    if stale > 0 {
        warn!("Marked {} interrupted job(s) as failed", stale);
    }

    let mut functions = FunctionRegistry::new();
    functions.register(Arc::new(AuditLogCleanupJob::new(
        config.audit.retention_days,
    )))?;
    let functions = Arc::new(functions);
    info!("Registered job functions: {:?}", functions.list());

    let queue = ExecutionQueue::new(functions, Arc::clone(&store));
    let registry = Arc::new(TemplateRegistry::new(
        Arc::clone(&store),
        queue,
        config.tasks,
    ));
    registry.load().await?;

    if config.audit.cleanup_template {
        ensure_cleanup_template(&registry).await?;
    }

    let handle = JobsHandle::new(Arc::clone(&registry), Arc::clone(&store));
    for template in handle.list_job_templates()? {
        info!(
            "Template {} ({}) -> {} [{}]",
            template.short_id, template.kind.kind_type, template.function_id, template.status
        );
    }

    let shutdown = CancellationToken::new();

    let scheduler_task = if config.scheduler_enabled {
        let scheduler = MinuteScheduler::new(Arc::clone(&registry));
        Some(tokio::spawn(scheduler.run(shutdown.clone())))
    } else {
        info!("Scheduler disabled");
        None
    };

    let metrics_task = tokio::spawn(server::run_metrics_server(
        config.metrics_port,
        shutdown.clone(),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down...");
    shutdown.cancel();

    if let Some(task) = scheduler_task {
        if let Err(e) = task.await {
            error!("Scheduler task failed: {}", e);
        }
    }
    match metrics_task.await {
        Ok(Err(e)) => error!("Metrics server failed: {}", e),
        Err(e) => error!("Metrics server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    Ok(())
}
