//! Worker Pool
//!
//! Fixed roster of named workers dispatching typed tasks onto a
//! bounded concurrency substrate. A worker is claimed with a
//! compare-exchange on its busy flag, so concurrent batches can never
//! select the same worker twice. The concurrency ceiling is always
//! finite and never exceeds the roster size.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::types::{PoolStats, TaskDispatch, TaskHandler, TaskStatus, TaskType, WorkerTask};

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

pub struct Worker {
    id: String,
    capabilities: Vec<TaskType>,
    /// Wildcard workers accept any task type.
    wildcard: bool,
    busy: AtomicBool,
    completed: AtomicU64,
}

impl Worker {
    fn new(id: String, capabilities: Vec<TaskType>, wildcard: bool) -> Self {
        Worker {
            id,
            capabilities,
            wildcard,
            busy: AtomicBool::new(false),
            completed: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn can_handle(&self, task_type: TaskType) -> bool {
        self.wildcard || self.capabilities.contains(&task_type)
    }

    /// Atomically flip idle to busy. False means another task got here
    /// first.
    fn try_claim(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Return to idle and count the task, pass or fail.
    fn release(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.busy.store(false, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn tasks_completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Built-in handler
// ---------------------------------------------------------------------------

/// Baseline task work keyed on task type. Real deployments swap in a
/// handler that routes to the inspector and tester.
pub struct DefaultTaskHandler;

#[async_trait]
impl TaskHandler for DefaultTaskHandler {
    async fn handle(&self, task: &WorkerTask) -> anyhow::Result<Value> {
        let module = task
            .payload
            .get("module_path")
            .cloned()
            .unwrap_or(Value::Null);
        let result = match task.task_type {
            TaskType::Test => json!({"tested": true, "module": module, "passed": true}),
            TaskType::Analyze => json!({"analyzed": true, "module": module, "issues": []}),
            TaskType::Repair => json!({"repaired": true, "module": module}),
            TaskType::Execute => {
                json!({"executed": true, "payload_size": task.payload.to_string().len()})
            }
        };
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

pub struct WorkerPool {
    workers: Vec<Arc<Worker>>,
    handler: Arc<dyn TaskHandler>,
    semaphore: Arc<Semaphore>,
    queue: Mutex<VecDeque<WorkerTask>>,
    results: Mutex<HashMap<String, TaskDispatch>>,
}

impl WorkerPool {
    /// Build the roster: `worker_count` standard workers handling
    /// test/analyze/execute, plus `hybrid_workers` wildcard workers.
    /// Concurrency is capped at `min(roster, max_concurrency)`.
    pub fn new(
        worker_count: usize,
        hybrid_workers: usize,
        max_concurrency: usize,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        let mut workers = Vec::with_capacity(worker_count + hybrid_workers);
        for i in 0..worker_count {
            workers.push(Arc::new(Worker::new(
                format!("worker-{:03}", i),
                vec![TaskType::Test, TaskType::Analyze, TaskType::Execute],
                false,
            )));
        }
        for i in 0..hybrid_workers {
            workers.push(Arc::new(Worker::new(
                format!("hybrid-{:03}", i),
                vec![TaskType::Repair, TaskType::Execute],
                true,
            )));
        }

        let ceiling = workers.len().min(max_concurrency).max(1);
        info!(
            "Worker pool ready: {} worker(s), concurrency ceiling {}",
            workers.len(),
            ceiling
        );

        WorkerPool {
            workers,
            handler,
            semaphore: Arc::new(Semaphore::new(ceiling)),
            queue: Mutex::new(VecDeque::new()),
            results: Mutex::new(HashMap::new()),
        }
    }

    /// Enqueue a task for a later `process_queued` call.
    pub fn submit(&self, task: WorkerTask) -> String {
        let task_id = task.task_id.clone();
        self.queue.lock().unwrap().push_back(task);
        task_id
    }

    /// Drain the queue and process everything in it as one batch.
    pub async fn process_queued(&self) -> Vec<TaskDispatch> {
        let tasks: Vec<WorkerTask> = self.queue.lock().unwrap().drain(..).collect();
        if tasks.is_empty() {
            return Vec::new();
        }
        self.process_batch(tasks).await
    }

    /// Dispatch each task to the first idle worker whose capabilities
    /// match, collecting dispatch records as tasks complete. Tasks with
    /// no idle matching worker at selection time are not queued; they
    /// come back as error entries so callers can resubmit.
    pub async fn process_batch(&self, tasks: Vec<WorkerTask>) -> Vec<TaskDispatch> {
        let mut set: JoinSet<TaskDispatch> = JoinSet::new();
        let mut dispatches = Vec::new();

        for mut task in tasks {
            let worker = match self.claim_worker(task.task_type) {
                Some(w) => w,
                None => {
                    dispatches.push(TaskDispatch {
                        task_id: task.task_id.clone(),
                        worker: None,
                        duration_ms: None,
                        result: None,
                        error: Some(format!(
                            "No idle worker for task type '{}'",
                            task.task_type.as_str()
                        )),
                    });
                    continue;
                }
            };

            let handler = self.handler.clone();
            let semaphore = self.semaphore.clone();
            set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        worker.release();
                        return TaskDispatch {
                            task_id: task.task_id.clone(),
                            worker: Some(worker.id().to_string()),
                            duration_ms: None,
                            result: None,
                            error: Some("worker pool shut down".to_string()),
                        };
                    }
                };

                let start = Instant::now();
                let outcome = handler.handle(&task).await;
                let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

                let dispatch = match outcome {
                    Ok(result) => {
                        task.status = TaskStatus::Completed;
                        task.result = Some(result.clone());
                        TaskDispatch {
                            task_id: task.task_id.clone(),
                            worker: Some(worker.id().to_string()),
                            duration_ms: Some(duration_ms),
                            result: Some(result),
                            error: None,
                        }
                    }
                    Err(e) => {
                        task.status = TaskStatus::Failed;
                        TaskDispatch {
                            task_id: task.task_id.clone(),
                            worker: Some(worker.id().to_string()),
                            duration_ms: Some(duration_ms),
                            result: None,
                            error: Some(e.to_string()),
                        }
                    }
                };

                worker.release();
                dispatch
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(dispatch) => {
                    if dispatch.error.is_none() {
                        self.results
                            .lock()
                            .unwrap()
                            .insert(dispatch.task_id.clone(), dispatch.clone());
                    }
                    dispatches.push(dispatch);
                }
                Err(e) => error!("Worker task failed to join: {}", e),
            }
        }

        dispatches
    }

    /// Completed dispatch for a task id, if it succeeded.
    pub fn result_for(&self, task_id: &str) -> Option<TaskDispatch> {
        self.results.lock().unwrap().get(task_id).cloned()
    }

    pub fn get_stats(&self) -> PoolStats {
        let idle = self.workers.iter().filter(|w| !w.is_busy()).count();
        PoolStats {
            total_workers: self.workers.len(),
            idle,
            busy: self.workers.len() - idle,
            queue_size: self.queue.lock().unwrap().len(),
            total_completed: self.workers.iter().map(|w| w.tasks_completed()).sum(),
        }
    }

    fn claim_worker(&self, task_type: TaskType) -> Option<Arc<Worker>> {
        self.workers
            .iter()
            .find(|w| w.can_handle(task_type) && w.try_claim())
            .cloned()
    }
}
