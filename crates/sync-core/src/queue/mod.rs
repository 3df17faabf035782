//! Priority sync queue with a worker-thread pool
//!
//! Tasks are dispatched lowest priority value first, FIFO within a
//! priority. Failed and timed-out attempts are requeued with a priority
//! penalty until the retry ceiling, then parked in a bounded history ring.
//! Cancellation of running work is cooperative through [`CancelFlag`].

mod task;

pub use task::{CancelFlag, SyncTask, TaskExecutor, TaskOutcome, TaskStatus};

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::conflict::ObjectType;
use crate::{Error, Result};

/// Tuning knobs for a [`SyncQueue`]
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum pending tasks before `enqueue` rejects
    pub capacity: usize,
    /// Worker threads started by [`SyncQueue::start`]
    pub workers: usize,
    /// Retry ceiling per task
    pub max_retries: u32,
    /// Execution budget per attempt
    pub default_timeout: Duration,
    /// Added to a task's priority on every requeue, so retries yield to
    /// fresh work
    pub retry_priority_penalty: i64,
    /// Terminal tasks kept in the history ring
    pub history_limit: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            workers: 4,
            max_retries: 3,
            default_timeout: Duration::from_secs(30),
            retry_priority_penalty: 10,
            history_limit: 100,
        }
    }
}

/// Point-in-time queue counters
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub timeout: u64,
    pub conflict: u64,
    pub total_processed: u64,
    pub average_execution_ms: f64,
    pub history_size: usize,
}

#[derive(Default)]
struct QueueState {
    pending: BTreeMap<(i64, u64), SyncTask>,
    running: HashMap<String, (SyncTask, CancelFlag)>,
    history: VecDeque<SyncTask>,
    paused: bool,
    shutdown: bool,
    next_seq: u64,
    succeeded: u64,
    failed: u64,
    cancelled: u64,
    timeout: u64,
    conflict: u64,
    total_processed: u64,
    total_exec_millis: u64,
}

impl QueueState {
    fn push_history(&mut self, task: SyncTask, limit: usize) {
        self.history.push_back(task);
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }

    fn count_terminal(&mut self, status: TaskStatus, elapsed: Duration) {
        match status {
            TaskStatus::Success => self.succeeded += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
            TaskStatus::Timeout => self.timeout += 1,
            TaskStatus::Conflict => self.conflict += 1,
            TaskStatus::Pending | TaskStatus::Running => {}
        }
        self.total_processed += 1;
        self.total_exec_millis += elapsed.as_millis() as u64;
    }
}

struct Inner {
    state: Mutex<QueueState>,
    /// Signaled when work arrives, the queue resumes, or shutdown begins
    work: Condvar,
    /// Signaled whenever a task reaches a final state
    idle: Condvar,
    executor: Arc<dyn TaskExecutor>,
    config: QueueConfig,
}

/// Bounded priority queue executing sync tasks on a thread pool
pub struct SyncQueue {
    inner: Arc<Inner>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncQueue {
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        Self::with_config(executor, QueueConfig::default())
    }

    pub fn with_config(executor: Arc<dyn TaskExecutor>, config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                work: Condvar::new(),
                idle: Condvar::new(),
                executor,
                config,
            }),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker pool. Idempotent per queue; call once.
    pub fn start(&self) {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for i in 0..self.inner.config.workers {
            let inner = Arc::clone(&self.inner);
            handles.push(
                std::thread::Builder::new()
                    .name(format!("sync-worker-{i}"))
                    .spawn(move || worker_loop(inner))
                    .expect("failed to spawn sync worker"),
            );
        }
        tracing::debug!(workers = self.inner.config.workers, "started sync queue");
    }

    /// Accept a new task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueFull`] when the pending set is at capacity.
    pub fn enqueue(&self, kind: ObjectType, object_id: &str, priority: i64) -> Result<String> {
        let mut state = self.lock();
        if state.pending.len() >= self.inner.config.capacity {
            return Err(Error::QueueFull {
                capacity: self.inner.config.capacity,
            });
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        let task = SyncTask::new(
            kind,
            object_id,
            priority,
            seq,
            self.inner.config.default_timeout,
        );
        let id = task.id.clone();
        state.pending.insert(task.dispatch_key(), task);
        drop(state);

        self.inner.work.notify_one();
        tracing::debug!(task_id = %id, object_id, priority, "enqueued task");
        Ok(id)
    }

    /// Cancel a task.
    ///
    /// Pending tasks are removed before dispatch; running tasks get their
    /// cancel flag raised and finish cooperatively; terminal tasks reject.
    pub fn cancel(&self, task_id: &str) -> Result<()> {
        let mut state = self.lock();

        if let Some(key) = state
            .pending
            .iter()
            .find(|(_, t)| t.id == task_id)
            .map(|(k, _)| *k)
        {
            let mut task = state.pending.remove(&key).unwrap();
            task.status = TaskStatus::Cancelled;
            task.finished_at = Some(Utc::now());
            state.count_terminal(TaskStatus::Cancelled, Duration::ZERO);
            let limit = self.inner.config.history_limit;
            state.push_history(task, limit);
            drop(state);
            self.inner.idle.notify_all();
            return Ok(());
        }

        if let Some((_, flag)) = state.running.get(task_id) {
            flag.cancel();
            return Ok(());
        }

        if let Some(task) = state.history.iter().find(|t| t.id == task_id) {
            return Err(Error::InvalidTaskState {
                task_id: task_id.to_string(),
                status: task.status,
                reason: "task already finished".to_string(),
            });
        }

        Err(Error::TaskNotFound {
            task_id: task_id.to_string(),
        })
    }

    /// Resubmit a failed or timed-out task from history.
    pub fn retry(&self, task_id: &str) -> Result<()> {
        let mut state = self.lock();
        let pos = state
            .history
            .iter()
            .position(|t| t.id == task_id)
            .ok_or_else(|| Error::TaskNotFound {
                task_id: task_id.to_string(),
            })?;

        let task = &state.history[pos];
        if !matches!(task.status, TaskStatus::Failed | TaskStatus::Timeout) {
            return Err(Error::InvalidTaskState {
                task_id: task_id.to_string(),
                status: task.status,
                reason: "only failed or timed-out tasks can be retried".to_string(),
            });
        }
        if task.retry_count >= self.inner.config.max_retries {
            return Err(Error::InvalidTaskState {
                task_id: task_id.to_string(),
                status: task.status,
                reason: format!("retry limit of {} reached", self.inner.config.max_retries),
            });
        }

        let mut task = state.history.remove(pos).unwrap();
        task.status = TaskStatus::Pending;
        task.retry_count += 1;
        task.seq = state.next_seq;
        state.next_seq += 1;
        task.started_at = None;
        task.finished_at = None;
        state.pending.insert(task.dispatch_key(), task);
        drop(state);

        self.inner.work.notify_one();
        Ok(())
    }

    /// Stop dispatching without discarding pending work
    pub fn pause(&self) {
        self.lock().paused = true;
        tracing::debug!("paused sync queue");
    }

    /// Resume dispatch after a pause
    pub fn resume(&self) {
        self.lock().paused = false;
        self.inner.work.notify_all();
        tracing::debug!("resumed sync queue");
    }

    /// Drain every currently pending task and execute it on the caller's
    /// thread, in dispatch order, ignoring the pause gate.
    ///
    /// Returns the number of tasks executed.
    pub fn force_sync(&self) -> usize {
        let drained: Vec<SyncTask> = {
            let mut state = self.lock();
            let keys: Vec<_> = state.pending.keys().copied().collect();
            keys.iter()
                .filter_map(|k| state.pending.remove(k))
                .collect()
        };

        let count = drained.len();
        for mut task in drained {
            task.status = TaskStatus::Running;
            task.started_at = Some(Utc::now());
            let flag = CancelFlag::new();
            {
                let mut state = self.lock();
                state.running.insert(task.id.clone(), (task.clone(), flag.clone()));
            }
            complete_task(&self.inner, task, flag);
        }
        tracing::info!(count, "force-sync drained queue");
        count
    }

    /// Look up a task anywhere: pending, running or history
    pub fn task(&self, task_id: &str) -> Result<SyncTask> {
        let state = self.lock();
        state
            .pending
            .values()
            .find(|t| t.id == task_id)
            .or_else(|| state.running.get(task_id).map(|(t, _)| t))
            .or_else(|| state.history.iter().find(|t| t.id == task_id))
            .cloned()
            .ok_or_else(|| Error::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    /// Point-in-time counters
    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            pending: state.pending.len(),
            running: state.running.len(),
            succeeded: state.succeeded,
            failed: state.failed,
            cancelled: state.cancelled,
            timeout: state.timeout,
            conflict: state.conflict,
            total_processed: state.total_processed,
            average_execution_ms: if state.total_processed == 0 {
                0.0
            } else {
                state.total_exec_millis as f64 / state.total_processed as f64
            },
            history_size: state.history.len(),
        }
    }

    /// Shrink the history ring to at most `max` entries, dropping oldest
    /// first. Returns the number of entries removed.
    pub fn cleanup_history(&self, max: usize) -> usize {
        let mut state = self.lock();
        let mut removed = 0;
        while state.history.len() > max {
            state.history.pop_front();
            removed += 1;
        }
        removed
    }

    /// Block until no task is pending or running, or the deadline passes.
    /// Returns true when the queue went idle.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.pending.is_empty() && state.running.is_empty() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .inner
                .idle
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = next;
        }
    }

    /// Stop the workers and join them. Pending tasks stay queued.
    pub fn shutdown(&self) {
        {
            let mut state = self.lock();
            state.shutdown = true;
        }
        self.inner.work.notify_all();
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for SyncQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(inner: Arc<Inner>) {
    loop {
        let (task, flag) = {
            let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
            loop {
                if state.shutdown {
                    return;
                }
                if !state.paused && !state.pending.is_empty() {
                    break;
                }
                state = inner.work.wait(state).unwrap_or_else(|e| e.into_inner());
            }
            let key = *state.pending.keys().next().expect("pending checked non-empty");
            let mut task = state.pending.remove(&key).expect("key taken under lock");
            task.status = TaskStatus::Running;
            task.started_at = Some(Utc::now());
            let flag = CancelFlag::new();
            state.running.insert(task.id.clone(), (task.clone(), flag.clone()));
            (task, flag)
        };
        complete_task(&inner, task, flag);
    }
}

/// Execute one task and apply its final state under the queue lock
fn complete_task(inner: &Inner, mut task: SyncTask, flag: CancelFlag) {
    let start = Instant::now();
    let outcome = inner.executor.execute(&task, &flag);
    let elapsed = start.elapsed();

    let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
    state.running.remove(&task.id);
    task.finished_at = Some(Utc::now());

    let status = if flag.is_cancelled() {
        TaskStatus::Cancelled
    } else if elapsed > task.timeout {
        TaskStatus::Timeout
    } else {
        match outcome {
            Ok(TaskOutcome::Completed { result }) => {
                task.result = result;
                TaskStatus::Success
            }
            Ok(TaskOutcome::Conflict { detail }) => {
                task.error = Some(detail);
                TaskStatus::Conflict
            }
            Err(err) => {
                task.error = Some(err.to_string());
                TaskStatus::Failed
            }
        }
    };

    let retryable = matches!(status, TaskStatus::Failed | TaskStatus::Timeout);
    if retryable && task.retry_count < inner.config.max_retries {
        task.status = TaskStatus::Pending;
        task.retry_count += 1;
        task.priority += inner.config.retry_priority_penalty;
        task.seq = state.next_seq;
        state.next_seq += 1;
        task.started_at = None;
        task.finished_at = None;
        tracing::debug!(
            task_id = %task.id,
            retry = task.retry_count,
            "requeued task after {status:?}"
        );
        state.pending.insert(task.dispatch_key(), task);
        drop(state);
        inner.work.notify_one();
    } else {
        task.status = status;
        state.count_terminal(status, elapsed);
        let limit = inner.config.history_limit;
        if status != TaskStatus::Success {
            tracing::warn!(task_id = %task.id, ?status, error = ?task.error, "task finished");
        }
        state.push_history(task, limit);
        drop(state);
    }
    inner.idle.notify_all();
}
