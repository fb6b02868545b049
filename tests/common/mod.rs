//! Common test infrastructure
//!
//! Builds a job service over a temporary SQLite store with a small set of
//! instrumented job functions. Tests should only import from this module.

#![allow(dead_code)]

mod flaky_store;

pub use flaky_store::FlakyStore;

use harvest_jobs::background_jobs::{
    ExecutionQueue, FunctionRegistry, JobsHandle, Task, TaskSettings, TemplateRegistry,
};
use harvest_jobs::job_store::{JobStatus, JobStore, SqliteJobStore, TemplateKind};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

pub const RECORD_PATH: &str = "/record";
pub const GATED_PATH: &str = "/gated";
pub const FAILS_PATH: &str = "/fails";
pub const PROGRESS_PATH: &str = "/progress";

/// Observations made by the instrumented job functions.
pub struct Tracker {
    /// Labels in the order `record` jobs completed.
    pub order: Mutex<Vec<String>>,
    running: AtomicUsize,
    pub max_running: AtomicUsize,
    /// Permits released to `gated` and `progress` jobs.
    pub gate: Semaphore,
}

impl Default for Tracker {
    fn default() -> Self {
        Self {
            order: Mutex::default(),
            running: AtomicUsize::default(),
            max_running: AtomicUsize::default(),
            gate: Semaphore::new(0),
        }
    }
}

impl Tracker {
    pub fn order(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct TestService {
    _temp_dir: TempDir,
    pub db_path: PathBuf,
    pub store: Arc<dyn JobStore>,
    pub registry: Arc<TemplateRegistry>,
    pub handle: JobsHandle,
    pub tracker: Arc<Tracker>,
}

impl TestService {
    pub async fn spawn() -> Self {
        Self::spawn_with(|store| store, TaskSettings::default()).await
    }

    /// Spawn with the SQLite store wrapped by `wrap` and the given task settings.
    pub async fn spawn_with<W>(wrap: W, task_settings: TaskSettings) -> Self
    where
        W: FnOnce(Arc<dyn JobStore>) -> Arc<dyn JobStore>,
    {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("jobs.db");
        let sqlite: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(&db_path).unwrap());
        let store = wrap(sqlite);
        let tracker = Arc::new(Tracker::default());

        let queue = ExecutionQueue::new(Arc::new(test_functions(&tracker)), Arc::clone(&store));
        let registry = Arc::new(TemplateRegistry::new(
            Arc::clone(&store),
            queue,
            task_settings,
        ));
        registry.load().await.unwrap();
        for (path, function) in [
            (RECORD_PATH, "record"),
            (GATED_PATH, "gated"),
            (FAILS_PATH, "fails"),
            (PROGRESS_PATH, "progress"),
        ] {
            registry
                .create(TemplateKind::rest_invoked(path), function)
                .await
                .unwrap();
        }
        let handle = JobsHandle::new(Arc::clone(&registry), Arc::clone(&store));

        Self {
            _temp_dir: temp_dir,
            db_path,
            store,
            registry,
            handle,
            tracker,
        }
    }

    /// A separately loaded registry on the same database, as an admin tool would open.
    pub async fn admin_registry(&self) -> Arc<TemplateRegistry> {
        let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(&self.db_path).unwrap());
        let tracker = Arc::new(Tracker::default());
        let queue = ExecutionQueue::new(Arc::new(test_functions(&tracker)), Arc::clone(&store));
        let registry = Arc::new(TemplateRegistry::new(store, queue, TaskSettings::default()));
        registry.load().await.unwrap();
        registry
    }

    pub fn queue(&self) -> &Arc<ExecutionQueue> {
        self.registry.queue()
    }

    pub async fn invoke(&self, path: &str, args: Value) -> String {
        self.handle
            .invoke_rest_template(path, args)
            .await
            .unwrap()
            .id
    }

    pub async fn record(&self, label: &str) -> String {
        self.invoke(RECORD_PATH, json!({ "label": label })).await
    }

    pub async fn wait_until_idle(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.queue().wait_until_idle())
            .await
            .expect("queue did not drain");
    }
}

fn test_functions(tracker: &Arc<Tracker>) -> FunctionRegistry {
    let mut functions = FunctionRegistry::new();

    let record_tracker = Arc::clone(tracker);
    functions
        .register_fn("record", move |_, args: Value| {
            let tracker = Arc::clone(&record_tracker);
            async move {
                tracker.enter();
                tokio::time::sleep(Duration::from_millis(5)).await;
                let label = args["label"].as_str().unwrap_or_default().to_string();
                tracker.order.lock().unwrap().push(label);
                tracker.exit();
                Ok(args)
            }
        })
        .unwrap();

    let gated_tracker = Arc::clone(tracker);
    functions
        .register_fn("gated", move |_, _| {
            let tracker = Arc::clone(&gated_tracker);
            async move {
                tracker.gate.acquire().await?.forget();
                Ok::<_, anyhow::Error>(Value::Null)
            }
        })
        .unwrap();

    functions
        .register_fn("fails", |_, _| async {
            Err::<Value, _>(anyhow::anyhow!("boom"))
        })
        .unwrap();

    let progress_tracker = Arc::clone(tracker);
    functions
        .register_fn("progress", move |ctx, _| {
            let tracker = Arc::clone(&progress_tracker);
            async move {
                tracker.gate.acquire().await?.forget();
                ctx.update("halfway");
                ctx.progress(1, 2);
                ctx.progress(2, 2);
                Ok::<_, anyhow::Error>(json!({ "steps": 2 }))
            }
        })
        .unwrap();

    functions
}

/// Poll `task` until it reaches `status`.
pub async fn wait_for_status(task: &Task, status: JobStatus) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while task.status() != status {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("task never reached the expected status");
}
