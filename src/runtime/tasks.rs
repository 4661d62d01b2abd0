//! Background task queue
//!
//! Named queues with a bounded number of workers each. Submitting returns a
//! task id immediately; the work runs in the background and its outcome is
//! recorded for later lookup. Completed records are kept for a retention
//! period and up to a fixed count, oldest evicted first.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use tracing::{error, info, Instrument};
use uuid::Uuid;

/// Queue used by cooperative tasks unless told otherwise
pub const DEFAULT_QUEUE: &str = "default";

/// Queue used by the blocking demo task
pub const CELERY_QUEUE: &str = "celery1";

/// Concurrent workers per queue
pub const WORKERS_PER_QUEUE: usize = 4;

/// Default time a completed task stays readable
pub const DEFAULT_TASK_RETENTION: Duration = Duration::from_secs(3600);

/// Default number of completed task records kept
pub const DEFAULT_MAX_FINISHED_TASKS: usize = 1000;

/// Lifecycle of a background task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for a worker
    Pending,
    /// Running
    Running,
    /// Completed with a result
    Finished,
    /// Completed with an error
    Failed,
}

/// Stored state of one background task
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    /// Task id handed back on submit
    pub task_id: String,
    /// Queue the task was submitted to
    pub queue: String,
    /// Current status
    pub status: TaskStatus,
    /// Result of a finished task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error of a failed task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Submission time
    pub submitted_at: DateTime<Utc>,
    /// Completion time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Work handed to the queue
pub enum TaskWork {
    /// Runs on the blocking thread pool
    Blocking(Box<dyn FnOnce() -> Result<Value, AppError> + Send + 'static>),
    /// Runs on the async runtime
    Cooperative(BoxFuture<'static, Result<Value, AppError>>),
}

#[derive(Debug, Clone, Copy)]
struct Retention {
    ttl: Duration,
    max_finished: usize,
}

#[derive(Default)]
struct TaskTable {
    records: HashMap<String, TaskRecord>,
    /// Completed task ids, oldest first
    finished: VecDeque<(Instant, String)>,
}

impl TaskTable {
    fn evict_expired(&mut self, ttl: Duration) {
        while let Some((finished_at, _)) = self.finished.front() {
            if finished_at.elapsed() < ttl {
                break;
            }
            if let Some((_, task_id)) = self.finished.pop_front() {
                self.records.remove(&task_id);
            }
        }
    }

    fn evict_overflow(&mut self, max_finished: usize) {
        while self.finished.len() > max_finished {
            if let Some((_, task_id)) = self.finished.pop_front() {
                self.records.remove(&task_id);
            }
        }
    }
}

/// Process-wide set of task queues
#[derive(Clone)]
pub struct TaskQueue {
    queues: Arc<HashMap<String, Arc<Semaphore>>>,
    table: Arc<RwLock<TaskTable>>,
    active: Arc<AtomicUsize>,
    retention: Retention,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new(&[
            (DEFAULT_QUEUE, WORKERS_PER_QUEUE),
            (CELERY_QUEUE, WORKERS_PER_QUEUE),
        ])
    }
}

impl TaskQueue {
    /// Create queues from `(name, workers)` pairs
    pub fn new(queues: &[(&str, usize)]) -> Self {
        let queues = queues
            .iter()
            .map(|(name, workers)| {
                (name.to_string(), Arc::new(Semaphore::new((*workers).max(1))))
            })
            .collect();
        Self {
            queues: Arc::new(queues),
            table: Arc::new(RwLock::new(TaskTable::default())),
            active: Arc::new(AtomicUsize::new(0)),
            retention: Retention {
                ttl: DEFAULT_TASK_RETENTION,
                max_finished: DEFAULT_MAX_FINISHED_TASKS,
            },
        }
    }

    /// Keep completed records for `ttl`, and at most `max_finished` of them
    pub fn with_retention(mut self, ttl: Duration, max_finished: usize) -> Self {
        self.retention = Retention {
            ttl,
            max_finished: max_finished.max(1),
        };
        self
    }

    /// Whether a queue with this name exists
    pub fn has_queue(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    /// Tasks submitted but not yet finished
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Record of a submitted task
    pub async fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.table.read().await.records.get(task_id).cloned()
    }

    /// Task records currently held, pending and completed
    pub async fn record_count(&self) -> usize {
        self.table.read().await.records.len()
    }

    /// Queue `work` on `queue` and return its pending record
    ///
    /// # Arguments
    /// * `queue` - Name of a declared queue
    /// * `work` - Job to run once a worker of that queue is free
    ///
    /// # Returns
    /// The `pending` record, before the work starts. Fails with
    /// `AppError::NotFound` when the queue does not exist.
    pub async fn submit(&self, queue: &str, work: TaskWork) -> Result<TaskRecord, AppError> {
        let workers = self
            .queues
            .get(queue)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("task queue {}", queue)))?;

        let record = TaskRecord {
            task_id: Uuid::new_v4().to_string(),
            queue: queue.to_string(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            submitted_at: Utc::now(),
            finished_at: None,
        };
        {
            let mut table = self.table.write().await;
            table.evict_expired(self.retention.ttl);
            table
                .records
                .insert(record.task_id.clone(), record.clone());
        }
        self.active.fetch_add(1, Ordering::SeqCst);
        info!(task_id = %record.task_id, queue = %queue, "Task submitted");

        let span = tracing::info_span!("task", task_id = %record.task_id, queue = %queue);
        let queue_handle = self.clone();
        let task_id = record.task_id.clone();
        tokio::spawn(
            async move {
                let outcome = match workers.acquire_owned().await {
                    Ok(_permit) => {
                        queue_handle.set_status(&task_id, TaskStatus::Running).await;
                        run_work(work).await
                    }
                    Err(_) => Err(AppError::Task("task queue closed".to_string())),
                };
                queue_handle.complete(&task_id, outcome).await;
            }
            .instrument(span),
        );

        Ok(record)
    }

    async fn set_status(&self, task_id: &str, status: TaskStatus) {
        if let Some(record) = self.table.write().await.records.get_mut(task_id) {
            record.status = status;
        }
    }

    async fn complete(&self, task_id: &str, outcome: Result<Value, AppError>) {
        let mut table = self.table.write().await;
        table.evict_expired(self.retention.ttl);
        if let Some(record) = table.records.get_mut(task_id) {
            record.finished_at = Some(Utc::now());
            match outcome {
                Ok(value) => {
                    record.status = TaskStatus::Finished;
                    record.result = Some(value);
                    info!("Task finished");
                }
                Err(e) => {
                    record.status = TaskStatus::Failed;
                    record.error = Some(e.to_string());
                    error!(error = %e, "Task failed");
                }
            }
            table
                .finished
                .push_back((Instant::now(), task_id.to_string()));
            table.evict_overflow(self.retention.max_finished);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn run_work(work: TaskWork) -> Result<Value, AppError> {
    match work {
        TaskWork::Blocking(job) => tokio::task::spawn_blocking(job)
            .await
            .map_err(|e| AppError::Task(format!("blocking task panicked: {}", e)))?,
        TaskWork::Cooperative(fut) => fut.await,
    }
}
