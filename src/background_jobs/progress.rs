//! Per-task publish/subscribe channel for `update`, `progress` and `status` events.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn, Level};

const STREAM_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Update,
    Progress,
    Status,
}

/// Status transition of a task, as seen by listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StatusEvent {
    Start,
    Return { result: Value },
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    Update {
        message: Value,
    },
    Progress {
        done: u64,
        total: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_duration_ms: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sub_process_id: Option<String>,
    },
    Status {
        status: StatusEvent,
    },
}

impl TaskEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TaskEvent::Update { .. } => EventKind::Update,
            TaskEvent::Progress { .. } => EventKind::Progress,
            TaskEvent::Status { .. } => EventKind::Status,
        }
    }
}

pub type Listener = Arc<dyn Fn(&TaskEvent) + Send + Sync>;

/// Returned by [`ProgressChannel::on_event`]; pass it back to `off_event` to detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Event fan-out owned by a single task.
///
/// Listeners attached at any time receive only the events emitted after they
/// were attached. Once `off_event` returns, no later emit reaches the listener.
pub struct ProgressChannel {
    task_id: String,
    log_level: Level,
    listeners: Mutex<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
    next_listener_id: AtomicU64,
    stream: broadcast::Sender<TaskEvent>,
}

impl ProgressChannel {
    pub fn new(task_id: impl Into<String>, log_level: Level) -> Self {
        let (stream, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            task_id: task_id.into(),
            log_level,
            listeners: Mutex::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
            stream,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    fn listeners(&self) -> MutexGuard<'_, HashMap<EventKind, Vec<(ListenerId, Listener)>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn on_event<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&TaskEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Detach a listener. Returns false if it was not attached for `kind`.
    pub fn off_event(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut listeners = self.listeners();
        let Some(attached) = listeners.get_mut(&kind) else {
            return false;
        };
        let before = attached.len();
        attached.retain(|(listener_id, _)| *listener_id != id);
        before != attached.len()
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners().get(&kind).map_or(0, Vec::len)
    }

    /// Receive every event emitted from now on. Dropping the receiver detaches it.
    pub fn subscribe_stream(&self) -> broadcast::Receiver<TaskEvent> {
        self.stream.subscribe()
    }

    /// Free-form structured message. Always logged, even with no listeners attached.
    pub fn update(&self, message: impl Into<Value>) {
        let message = message.into();
        match self.log_level {
            Level::ERROR => error!(task_id = %self.task_id, "{}", message),
            Level::WARN => warn!(task_id = %self.task_id, "{}", message),
            Level::INFO => info!(task_id = %self.task_id, "{}", message),
            Level::DEBUG => debug!(task_id = %self.task_id, "{}", message),
            _ => trace!(task_id = %self.task_id, "{}", message),
        }
        self.emit(TaskEvent::Update { message });
    }

    /// Report `done` out of `total` units of work, optionally for a named sub-process.
    pub fn progress(
        &self,
        done: u64,
        total: u64,
        last_duration_ms: Option<u64>,
        sub_process_id: Option<&str>,
    ) {
        self.emit(TaskEvent::Progress {
            done,
            total,
            last_duration_ms,
            sub_process_id: sub_process_id.map(str::to_string),
        });
    }

    pub(crate) fn status(&self, status: StatusEvent) {
        self.emit(TaskEvent::Status { status });
    }

    fn emit(&self, event: TaskEvent) {
        // Snapshot so listeners run without the lock held and may detach themselves.
        let snapshot: Vec<Listener> = self
            .listeners()
            .get(&event.kind())
            .map(|attached| attached.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in snapshot {
            listener(&event);
        }

        // No subscribers is not an error.
        let _ = self.stream.send(event);
    }
}
