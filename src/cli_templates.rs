use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use harvest_jobs::background_jobs::jobs::AuditLogCleanupJob;
use harvest_jobs::background_jobs::{
    ExecutionQueue, FunctionRegistry, JobsHandle, TaskSettings, TemplateRegistry,
};
use harvest_jobs::config::DEFAULT_AUDIT_RETENTION_DAYS;
use harvest_jobs::job_store::{
    parse_days, parse_time_of_invocation, JobStore, SqliteJobStore, TemplateKind, TemplateStatus,
};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser)]
struct CliArgs {
    /// Path to the SQLite job store database file.
    #[clap(value_parser = parse_path)]
    db_path: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Lists all job templates.
    List,

    /// Lists the job functions templates can refer to.
    Functions,

    /// Creates a template fired by the scheduler.
    CreatePeriodic {
        #[clap(long)]
        function: String,
        /// Time of invocation, HH:MM in local time.
        #[clap(long)]
        time: String,
        /// Comma-separated weekdays, e.g. mon,wed,fri.
        #[clap(long)]
        days: String,
    },

    /// Creates a template fired through its url path.
    CreateRest {
        #[clap(long)]
        function: String,
        #[clap(long)]
        path: String,
    },

    /// Deletes a template by id or short id.
    Delete { template: String },

    /// Sets a template's status: not_started, active, finished or inactive.
    SetStatus { template: String, status: String },

    /// Shows the most recent runs of a template.
    History {
        template: String,
        #[clap(long, default_value_t = 20)]
        limit: usize,
    },

    /// Shows the job audit log, optionally for a single job.
    Audit {
        #[clap(long)]
        job: Option<String>,
        #[clap(long, default_value_t = 50)]
        limit: usize,
        #[clap(long, default_value_t = 0)]
        offset: usize,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize tracing")?;

    let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(&cli_args.db_path)?);
    let mut functions = FunctionRegistry::new();
    functions.register(Arc::new(AuditLogCleanupJob::new(
        DEFAULT_AUDIT_RETENTION_DAYS,
    )))?;
    // Never enqueued: jobs only run in the service, which reloads templates every tick.
    let queue = ExecutionQueue::new(Arc::new(functions), Arc::clone(&store));
    let registry = Arc::new(TemplateRegistry::new(
        Arc::clone(&store),
        queue,
        TaskSettings::default(),
    ));
    registry.load().await?;
    let handle = JobsHandle::new(Arc::clone(&registry), Arc::clone(&store));

    match cli_args.command {
        Command::List => {
            let templates = handle.list_job_templates()?;
            if templates.is_empty() {
                println!("No templates.");
            } else {
                print_json(&templates)?;
            }
        }
        Command::Functions => {
            for (id, description) in registry.queue().functions().list() {
                println!("{:<24} {}", id, description);
            }
        }
        Command::CreatePeriodic {
            function,
            time,
            days,
        } => {
            let time = parse_time_of_invocation(&time)
                .with_context(|| format!("Invalid time '{}', expected HH:MM", time))?;
            let days =
                parse_days(&days).with_context(|| format!("Invalid day list '{}'", days))?;
            let template = registry
                .create(TemplateKind::periodic(time, days), &function)
                .await?;
            println!("Created periodic template {} ({})", template.short_id(), template.id());
        }
        Command::CreateRest { function, path } => {
            let template = registry
                .create(TemplateKind::rest_invoked(path), &function)
                .await?;
            println!("Created REST template {} ({})", template.short_id(), template.id());
        }
        Command::Delete { template } => {
            registry.delete(&template).await?;
            println!("Deleted template {}", template);
        }
        Command::SetStatus { template, status } => {
            let Some(status) = TemplateStatus::parse(&status) else {
                bail!("Unknown template status '{}'", status);
            };
            let Some(found) = registry.get_by_id(&template)? else {
                bail!("Template {} not found", template);
            };
            found.update_status(status).await?;
            println!("Template {} is now {}", found.short_id(), status.as_str());
        }
        Command::History { template, limit } => {
            print_json(&handle.get_job_history(&template, limit).await?)?;
        }
        Command::Audit { job, limit, offset } => {
            let entries = match job {
                Some(job_id) => handle.get_job_audit_log_by_job(&job_id, limit, offset).await?,
                None => handle.get_job_audit_log(limit, offset).await?,
            };
            print_json(&entries)?;
        }
    }

    Ok(())
}
