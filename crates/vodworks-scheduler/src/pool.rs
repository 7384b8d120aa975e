//! Worker pool: dynamic worker set, pull-execute-update loops, lifecycle
//! events, health sweep, and bounded shutdown.
//!
//! Workers never own task records; they hold the task id through the
//! executor call and funnel every mutation through the [`TaskStore`]. No
//! lock is held across executor I/O.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use vodworks_core::events::{topics, EventBus, TaskEvent};
use vodworks_core::models::{PoolStats, Task, TaskStatus, WorkerInfo, WorkerStatus};
use vodworks_core::{ExecutorError, SchedulerConfig, SchedulerError, TranscodeExecutor};

use crate::queue::TaskQueue;
use crate::store::TaskStore;

const STATUS_IDLE: u8 = 0;
const STATUS_BUSY: u8 = 1;
const STATUS_UNHEALTHY: u8 = 2;

/// Per-worker state shared between the worker loop and pool introspection.
struct WorkerState {
    id: Uuid,
    status: AtomicU8,
    current_task: std::sync::Mutex<Option<Uuid>>,
    completed: AtomicU64,
    failed: AtomicU64,
    busy_micros: AtomicU64,
    last_heartbeat_ms: AtomicI64,
}

impl WorkerState {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            status: AtomicU8::new(STATUS_IDLE),
            current_task: std::sync::Mutex::new(None),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            busy_micros: AtomicU64::new(0),
            last_heartbeat_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    fn beat(&self) {
        self.last_heartbeat_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn status(&self) -> WorkerStatus {
        match self.status.load(Ordering::Relaxed) {
            STATUS_BUSY => WorkerStatus::Busy,
            STATUS_UNHEALTHY => WorkerStatus::Unhealthy,
            _ => WorkerStatus::Idle,
        }
    }

    fn set_status(&self, status: WorkerStatus) {
        let raw = match status {
            WorkerStatus::Idle => STATUS_IDLE,
            WorkerStatus::Busy => STATUS_BUSY,
            WorkerStatus::Unhealthy => STATUS_UNHEALTHY,
        };
        self.status.store(raw, Ordering::Relaxed);
    }

    fn set_current(&self, task: Option<Uuid>) {
        *self.current_task.lock().unwrap_or_else(|e| e.into_inner()) = task;
    }

    fn info(&self) -> WorkerInfo {
        WorkerInfo {
            id: self.id,
            status: self.status(),
            current_task: *self.current_task.lock().unwrap_or_else(|e| e.into_inner()),
            completed_count: self.completed.load(Ordering::Relaxed),
            failed_count: self.failed.load(Ordering::Relaxed),
            busy_time: Duration::from_micros(self.busy_micros.load(Ordering::Relaxed)),
            last_heartbeat: chrono::DateTime::from_timestamp_millis(
                self.last_heartbeat_ms.load(Ordering::Relaxed),
            )
            .unwrap_or_else(Utc::now),
        }
    }
}

struct WorkerHandle {
    state: Arc<WorkerState>,
    token: CancellationToken,
    join: JoinHandle<()>,
    /// Graceful stop requested; the worker finishes its current task and
    /// exits, and no longer counts toward the active size.
    stopping: bool,
}

/// Everything a worker loop needs, cloned out of the pool so workers hold no
/// reference back into it.
struct WorkerContext {
    state: Arc<WorkerState>,
    token: CancellationToken,
    queue: Arc<TaskQueue>,
    store: Arc<TaskStore>,
    executor: Arc<dyn TranscodeExecutor>,
    bus: Arc<dyn EventBus>,
    task_timeout: Duration,
    concurrency: Arc<Semaphore>,
    total_processed: Arc<AtomicU64>,
    total_failed: Arc<AtomicU64>,
}

pub struct WorkerPool {
    queue: Arc<TaskQueue>,
    store: Arc<TaskStore>,
    executor: Arc<dyn TranscodeExecutor>,
    bus: Arc<dyn EventBus>,
    config: SchedulerConfig,
    token: CancellationToken,
    workers: RwLock<HashMap<Uuid, WorkerHandle>>,
    target_size: AtomicUsize,
    /// Caps in-flight executions when the pool grows past it.
    concurrency: Arc<Semaphore>,
    total_processed: Arc<AtomicU64>,
    total_failed: Arc<AtomicU64>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<TaskQueue>,
        store: Arc<TaskStore>,
        executor: Arc<dyn TranscodeExecutor>,
        bus: Arc<dyn EventBus>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let concurrency = Arc::new(Semaphore::new(config.max_concurrent_tasks));
        Arc::new(Self {
            queue,
            store,
            executor,
            bus,
            config,
            token: CancellationToken::new(),
            workers: RwLock::new(HashMap::new()),
            target_size: AtomicUsize::new(0),
            concurrency,
            total_processed: Arc::new(AtomicU64::new(0)),
            total_failed: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Spawn the initial workers and the health sweeper.
    pub async fn start(self: &Arc<Self>) {
        let initial = self.config.worker_pool_size;
        self.scale(initial).await;
        self.spawn_health_sweeper();
        tracing::info!(workers = initial, "Worker pool started");
        self.publish_lifecycle("pool.started", serde_json::json!({ "workers": initial }))
            .await;
    }

    /// Resize the pool to `target` workers, clamped to the scaling bounds.
    ///
    /// Enlargement starts workers eagerly. Shrinkage is graceful: selected
    /// workers stop pulling and exit after their current task; the reported
    /// size reflects the target immediately while exited workers are reaped
    /// lazily.
    pub async fn scale(&self, target: usize) -> usize {
        let target = target.clamp(
            self.config.scaling.min_workers,
            self.config.scaling.max_workers,
        );

        let current = {
            let mut workers = self.workers.write().await;
            workers.retain(|_, handle| !handle.join.is_finished());
            let active: Vec<Uuid> = workers
                .iter()
                .filter(|(_, handle)| !handle.stopping)
                .map(|(id, _)| *id)
                .collect();
            let current = active.len();

            if target > current {
                for _ in 0..(target - current) {
                    self.spawn_worker(&mut workers);
                }
            } else if target < current {
                for id in active.iter().take(current - target) {
                    if let Some(handle) = workers.get_mut(id) {
                        handle.token.cancel();
                        handle.stopping = true;
                    }
                }
            }
            current
        };

        self.target_size.store(target, Ordering::Relaxed);
        metrics::gauge!("pool.size").set(target as f64);

        if target != current {
            tracing::info!(from = current, to = target, "Worker pool resized");
            self.publish_lifecycle(
                "pool.scaled",
                serde_json::json!({ "from": current, "to": target }),
            )
            .await;
        }
        target
    }

    fn spawn_worker(&self, workers: &mut HashMap<Uuid, WorkerHandle>) {
        let id = Uuid::new_v4();
        let state = Arc::new(WorkerState::new(id));
        let token = self.token.child_token();
        let ctx = WorkerContext {
            state: state.clone(),
            token: token.clone(),
            queue: self.queue.clone(),
            store: self.store.clone(),
            executor: self.executor.clone(),
            bus: self.bus.clone(),
            task_timeout: self.config.task_timeout(),
            concurrency: self.concurrency.clone(),
            total_processed: self.total_processed.clone(),
            total_failed: self.total_failed.clone(),
        };
        let join = tokio::spawn(run_worker(ctx));
        workers.insert(
            id,
            WorkerHandle {
                state,
                token,
                join,
                stopping: false,
            },
        );
    }

    /// Current pool size. Reflects the last scale target, not the lazily
    /// reaped worker tasks.
    pub fn size(&self) -> usize {
        self.target_size.load(Ordering::Relaxed)
    }

    pub async fn workers(&self) -> Vec<WorkerInfo> {
        let workers = self.workers.read().await;
        workers
            .values()
            .filter(|handle| !handle.join.is_finished())
            .map(|handle| handle.state.info())
            .collect()
    }

    pub async fn stats(&self) -> PoolStats {
        let infos = self.workers().await;
        let mut stats = PoolStats {
            total_workers: infos.len(),
            total_processed: self.total_processed.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            ..Default::default()
        };
        for info in &infos {
            match info.status {
                WorkerStatus::Idle => stats.idle_workers += 1,
                WorkerStatus::Busy => stats.busy_workers += 1,
                WorkerStatus::Unhealthy => stats.unhealthy_workers += 1,
            }
        }
        stats
    }

    /// Mark Busy workers that have been silent past the heartbeat deadline.
    /// Unhealthy workers are reported, never killed; a worker that comes
    /// back rewrites its own status on the next transition.
    pub async fn health_sweep(&self) {
        let unhealthy_after = self.config.unhealthy_after().as_millis() as i64;
        let now_ms = Utc::now().timestamp_millis();
        let workers = self.workers.read().await;
        let mut unhealthy = 0u64;
        for handle in workers.values() {
            let state = &handle.state;
            if state.status() == WorkerStatus::Busy {
                let silent_ms = now_ms - state.last_heartbeat_ms.load(Ordering::Relaxed);
                if silent_ms > unhealthy_after {
                    state.set_status(WorkerStatus::Unhealthy);
                    tracing::warn!(
                        worker_id = %state.id,
                        silent_ms = silent_ms,
                        "Worker missed heartbeats, marking unhealthy"
                    );
                }
            }
            if state.status() == WorkerStatus::Unhealthy {
                unhealthy += 1;
            }
        }
        metrics::gauge!("pool.unhealthy_workers").set(unhealthy as f64);
    }

    fn spawn_health_sweeper(self: &Arc<Self>) {
        let pool = self.clone();
        let token = self.token.clone();
        let interval = self.config.health_check_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => pool.health_sweep().await,
                }
            }
        });
    }

    /// Stop the pool and wait up to `deadline` for workers to finish their
    /// current tasks. On timeout the workers keep draining in the background
    /// and the caller gets a `Timeout` error.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), SchedulerError> {
        tracing::info!("Worker pool shutting down");
        self.token.cancel();

        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.write().await;
            workers.drain().map(|(_, handle)| handle.join).collect()
        };

        let drain = async {
            for join in handles {
                let _ = join.await;
            }
        };

        match tokio::time::timeout(deadline, drain).await {
            Ok(()) => {
                self.publish_lifecycle("pool.stopped", serde_json::json!({})).await;
                tracing::info!("Worker pool stopped");
                Ok(())
            }
            Err(_) => Err(SchedulerError::Timeout(format!(
                "worker pool did not drain within {:?}",
                deadline
            ))),
        }
    }

    async fn publish_lifecycle(&self, kind: &str, mut detail: serde_json::Value) {
        if let Some(obj) = detail.as_object_mut() {
            obj.insert("event".to_string(), serde_json::json!(kind));
            obj.insert("timestamp".to_string(), serde_json::json!(Utc::now()));
        }
        if let Err(e) = self.bus.publish(topics::PLUGIN_EVENTS, detail).await {
            tracing::warn!(event = kind, error = %e, "Lifecycle event publish failed");
        }
    }
}

async fn run_worker(ctx: WorkerContext) {
    tracing::debug!(worker_id = %ctx.state.id, "Worker started");
    loop {
        // Take a concurrency permit before pulling, so a capped pool never
        // holds a dequeued task it cannot run yet.
        let permit = tokio::select! {
            _ = ctx.token.cancelled() => break,
            permit = ctx.concurrency.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let Some(task) = ctx.queue.dequeue(&ctx.token).await else {
            break;
        };
        process_task(&ctx, task).await;
        drop(permit);
    }
    tracing::debug!(worker_id = %ctx.state.id, "Worker stopped");
}

#[tracing::instrument(skip(ctx, task), fields(task_id = %task.id, worker_id = %ctx.state.id))]
async fn process_task(ctx: &WorkerContext, task: Task) {
    let task = match ctx.store.mark_processing(task.id, ctx.state.id).await {
        Ok(task) => task,
        Err(e) => {
            // Lost the claim (cancelled in the gap between dequeue and here).
            tracing::debug!(error = %e, "Skipping task that could not be claimed");
            return;
        }
    };

    ctx.state.set_status(WorkerStatus::Busy);
    ctx.state.set_current(Some(task.id));
    ctx.state.beat();
    publish_task_event(
        ctx,
        topics::TASK_STARTED,
        TaskEvent::new(task.id, TaskStatus::Processing, Some(ctx.state.id)),
    )
    .await;

    let started = Instant::now();
    let result = execute_with_progress(ctx, &task).await;
    ctx.state
        .busy_micros
        .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);

    match result {
        Ok(()) => handle_success(ctx, &task, started.elapsed()).await,
        Err(err) => handle_failure(ctx, &task, err).await,
    }

    ctx.state.set_current(None);
    ctx.state.set_status(WorkerStatus::Idle);
    ctx.state.beat();
}

/// Drive the executor while folding progress reports into the task record.
/// The whole call is bounded by the configured task timeout.
async fn execute_with_progress(ctx: &WorkerContext, task: &Task) -> Result<(), ExecutorError> {
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let exec = ctx.executor.execute(task, progress_tx);
    tokio::pin!(exec);
    let deadline = tokio::time::sleep(ctx.task_timeout);
    tokio::pin!(deadline);
    let mut progress_open = true;

    loop {
        tokio::select! {
            result = &mut exec => return result,
            maybe = progress_rx.recv(), if progress_open => match maybe {
                Some(percent) => {
                    let _ = ctx.store.update_progress(task.id, percent).await;
                    ctx.state.beat();
                }
                None => progress_open = false,
            },
            _ = &mut deadline => {
                return Err(ExecutorError::transient(format!(
                    "task execution exceeded {:?} timeout",
                    ctx.task_timeout
                )));
            }
        }
    }
}

async fn handle_success(ctx: &WorkerContext, task: &Task, elapsed: Duration) {
    if let Err(e) = ctx.store.mark_completed(task.id).await {
        tracing::error!(error = %e, "Failed to mark task completed");
        return;
    }
    ctx.state.completed.fetch_add(1, Ordering::Relaxed);
    ctx.total_processed.fetch_add(1, Ordering::Relaxed);
    ctx.queue.metrics().record_processed();
    metrics::histogram!("task.duration_seconds").record(elapsed.as_secs_f64());
    publish_task_event(
        ctx,
        topics::TASK_COMPLETED,
        TaskEvent::new(task.id, TaskStatus::Completed, Some(ctx.state.id)),
    )
    .await;
    tracing::info!(
        duration_ms = elapsed.as_millis() as u64,
        "Task completed"
    );
}

async fn handle_failure(ctx: &WorkerContext, task: &Task, err: ExecutorError) {
    let fresh = match ctx.store.get(task.id).await {
        Ok(task) => task,
        Err(e) => {
            tracing::error!(error = %e, "Failed task vanished from store");
            return;
        }
    };

    if err.is_transient() && fresh.can_retry() {
        match ctx.store.reset_for_retry(task.id, err.to_string()).await {
            Ok(retried) => {
                tracing::warn!(
                    error = %err,
                    retry_count = retried.retry_count,
                    max_retries = retried.max_retries,
                    "Task failed, re-enqueueing for retry"
                );
                publish_task_event(
                    ctx,
                    topics::TASK_FAILED,
                    TaskEvent::failed(task.id, Some(ctx.state.id), err.to_string(), true),
                )
                .await;
                if let Err(requeue_err) = ctx.queue.requeue(task.id) {
                    // Submitters refilled the queue while this task was
                    // in flight; the retry has nowhere to go.
                    tracing::error!(
                        error = %requeue_err,
                        "Dropping retry, queue at capacity"
                    );
                    fail_terminally(ctx, task, format!("retry dropped: {}", requeue_err)).await;
                }
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "Retry reset failed, marking task failed");
            }
        }
    }

    fail_terminally(ctx, task, err.to_string()).await;
}

async fn fail_terminally(ctx: &WorkerContext, task: &Task, error: String) {
    if let Err(e) = ctx.store.mark_failed(task.id, error.clone()).await {
        tracing::error!(error = %e, "Failed to mark task failed");
        return;
    }
    ctx.state.failed.fetch_add(1, Ordering::Relaxed);
    ctx.total_failed.fetch_add(1, Ordering::Relaxed);
    ctx.queue.metrics().record_failed();
    publish_task_event(
        ctx,
        topics::TASK_FAILED,
        TaskEvent::failed(task.id, Some(ctx.state.id), error.clone(), false),
    )
    .await;
    tracing::error!(error = %error, "Task failed terminally");
}

async fn publish_task_event(ctx: &WorkerContext, topic: &str, event: TaskEvent) {
    match serde_json::to_value(&event) {
        Ok(payload) => {
            if let Err(e) = ctx.bus.publish(topic, payload).await {
                tracing::warn!(topic = topic, error = %e, "Event publish failed");
            }
        }
        Err(e) => tracing::warn!(topic = topic, error = %e, "Event serialization failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CapturingBus, MockExecutor, MockOutcome};
    use vodworks_core::models::{Priority, TranscodeProfile};

    fn test_config(initial: usize, min: usize, max: usize) -> SchedulerConfig {
        let mut config = SchedulerConfig::default();
        config.worker_pool_size = initial;
        config.scaling.min_workers = min;
        config.scaling.max_workers = max;
        config.task_timeout_secs = 5;
        config
    }

    fn task() -> Task {
        Task::new(
            "s3://media/in.mov".to_string(),
            vec![TranscodeProfile {
                resolution: "1280x720".to_string(),
                bitrate_kbps: 2500,
                container: "mp4".to_string(),
            }],
            Priority::STANDARD,
            3,
        )
    }

    fn pool_with(
        executor: Arc<MockExecutor>,
        config: SchedulerConfig,
    ) -> (Arc<TaskStore>, Arc<TaskQueue>, Arc<CapturingBus>, Arc<WorkerPool>) {
        let store = Arc::new(TaskStore::new());
        let bus = Arc::new(CapturingBus::new());
        let queue = Arc::new(TaskQueue::new(
            store.clone(),
            bus.clone(),
            config.max_queue_size,
        ));
        let pool = WorkerPool::new(queue.clone(), store.clone(), executor, bus.clone(), config);
        (store, queue, bus, pool)
    }

    async fn wait_for_status(store: &TaskStore, id: Uuid, status: TaskStatus) -> Task {
        for _ in 0..200 {
            let task = store.get(id).await.unwrap();
            if task.status == status {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} never reached {:?}", id, status);
    }

    #[tokio::test]
    async fn test_scale_to_current_is_noop() {
        let (_store, _queue, _bus, pool) =
            pool_with(MockExecutor::always_ok(), test_config(2, 1, 4));
        pool.start().await;
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.scale(2).await, 2);
        assert_eq!(pool.size(), 2);
        pool.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_scale_is_clamped_to_bounds() {
        let (_store, _queue, _bus, pool) =
            pool_with(MockExecutor::always_ok(), test_config(2, 1, 4));
        pool.start().await;
        assert_eq!(pool.scale(100).await, 4);
        assert_eq!(pool.scale(0).await, 1);
        pool.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_happy_path_completes_task_and_publishes_events() {
        let (store, queue, bus, pool) =
            pool_with(MockExecutor::always_ok(), test_config(1, 1, 4));
        pool.start().await;

        let id = queue.enqueue(task()).await.unwrap();
        let done = wait_for_status(&store, id, TaskStatus::Completed).await;
        assert_eq!(done.progress, 100.0);
        assert!(done.worker_id.is_some());
        assert!(done.completed_at.is_some());

        let topics_seen = bus.topics_for(id);
        assert_eq!(
            topics_seen,
            vec![
                topics::TASK_SUBMITTED,
                topics::TASK_STARTED,
                topics::TASK_COMPLETED
            ]
        );
        pool.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_transient_failure_retries_then_succeeds() {
        let executor = MockExecutor::with_script(vec![
            MockOutcome::FailTransient("encoder hiccup"),
            MockOutcome::Succeed,
        ]);
        let (store, queue, bus, pool) = pool_with(executor.clone(), test_config(1, 1, 4));
        pool.start().await;

        let mut t = task();
        t.max_retries = 2;
        let id = queue.enqueue(t).await.unwrap();
        let done = wait_for_status(&store, id, TaskStatus::Completed).await;
        assert_eq!(done.retry_count, 1);
        assert_eq!(executor.attempts(), 2);

        let failed_events = bus.events_on(topics::TASK_FAILED);
        assert_eq!(failed_events.len(), 1);
        assert_eq!(failed_events[0]["retryable"], true);
        assert_eq!(bus.events_on(topics::TASK_COMPLETED).len(), 1);
        pool.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_retry_exhaustion_marks_failed() {
        let executor = MockExecutor::with_script(vec![
            MockOutcome::FailTransient("hiccup one"),
            MockOutcome::FailTransient("hiccup two"),
        ]);
        let (store, queue, bus, pool) = pool_with(executor, test_config(1, 1, 4));
        pool.start().await;

        let mut t = task();
        t.max_retries = 1;
        let id = queue.enqueue(t).await.unwrap();
        let failed = wait_for_status(&store, id, TaskStatus::Failed).await;
        assert_eq!(failed.retry_count, 1);
        assert!(failed.error.is_some());

        let failed_events = bus.events_on(topics::TASK_FAILED);
        assert_eq!(failed_events.len(), 2);
        assert_eq!(failed_events[0]["retryable"], true);
        assert_eq!(failed_events[1]["retryable"], false);
        pool.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_permanent_failure_never_retries() {
        let executor = MockExecutor::with_script(vec![MockOutcome::FailPermanent("bad source")]);
        let (store, queue, _bus, pool) = pool_with(executor.clone(), test_config(1, 1, 4));
        pool.start().await;

        let id = queue.enqueue(task()).await.unwrap();
        let failed = wait_for_status(&store, id, TaskStatus::Failed).await;
        assert_eq!(failed.retry_count, 0);
        assert_eq!(executor.attempts(), 1);
        pool.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_pending_task_is_never_dispatched() {
        let executor = MockExecutor::always_ok();
        let (store, queue, bus, pool) = pool_with(executor.clone(), test_config(1, 1, 4));

        let id = queue.enqueue(task()).await.unwrap();
        store.cancel(id).await.unwrap();
        // Start the pool only after cancelling, so the dequeue sees the
        // cancelled record and must skip it.
        pool.start().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.get(id).await.unwrap().status, TaskStatus::Cancelled);
        assert_eq!(executor.attempts(), 0);
        // Only the submission announcement; never started or failed.
        assert_eq!(bus.topics_for(id), vec![topics::TASK_SUBMITTED]);
        pool.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_times_out_while_task_in_flight() {
        let executor = MockExecutor::with_script(vec![MockOutcome::Hang]);
        let (_store, queue, _bus, pool) = pool_with(executor, test_config(1, 1, 4));
        pool.start().await;

        queue.enqueue(task()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let result = pool.shutdown(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(SchedulerError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_health_sweep_marks_silent_busy_worker() {
        let executor = MockExecutor::with_script(vec![MockOutcome::Hang]);
        let mut config = test_config(1, 1, 4);
        config.unhealthy_after_secs = 0;
        config.task_timeout_secs = 3600;
        let (_store, queue, _bus, pool) = pool_with(executor, config);
        pool.start().await;

        queue.enqueue(task()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        pool.health_sweep().await;
        let stats = pool.stats().await;
        assert_eq!(stats.unhealthy_workers, 1);
    }

    #[tokio::test]
    async fn test_concurrency_cap_bounds_inflight_tasks() {
        let executor = MockExecutor::slow(Duration::from_millis(200));
        let mut config = test_config(3, 1, 4);
        config.max_concurrent_tasks = 1;
        let (_store, queue, _bus, pool) = pool_with(executor, config);
        pool.start().await;

        for _ in 0..3 {
            queue.enqueue(task()).await.unwrap();
        }
        for _ in 0..10 {
            let stats = pool.stats().await;
            assert!(stats.busy_workers <= 1);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        pool.shutdown(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_pool_stats_counts_processed() {
        let (store, queue, _bus, pool) =
            pool_with(MockExecutor::always_ok(), test_config(2, 1, 4));
        pool.start().await;

        let a = queue.enqueue(task()).await.unwrap();
        let b = queue.enqueue(task()).await.unwrap();
        wait_for_status(&store, a, TaskStatus::Completed).await;
        wait_for_status(&store, b, TaskStatus::Completed).await;

        let stats = pool.stats().await;
        assert_eq!(stats.total_processed, 2);
        assert_eq!(stats.total_failed, 0);
        pool.shutdown(Duration::from_secs(1)).await.unwrap();
    }
}
