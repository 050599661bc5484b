//! Worker pool used as a stage's isolated execution resource.

use super::PoolConfig;
use crate::errors::{PipelineError, RejectReason};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

type Task = BoxFuture<'static, ()>;

/// Callback invoked when a submitted task panics.
pub type TaskFailureHook = Arc<dyn Fn(&TaskFailure) + Send + Sync>;

/// A task that panicked on a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// The pool the task ran on.
    pub pool: String,
    /// The panic message.
    pub message: String,
}

/// Snapshot of a pool's task counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolMetrics {
    /// Tasks accepted by `submit`.
    pub submitted: u64,
    /// Tasks that ran to completion.
    pub completed: u64,
    /// Tasks that panicked.
    pub failed: u64,
    /// Tasks refused by `submit`.
    pub rejected: u64,
    /// Tasks waiting in the queue.
    pub queued: usize,
    /// Tasks currently running.
    pub active: usize,
}

enum TaskSender {
    Bounded(mpsc::Sender<Task>),
    Unbounded(mpsc::UnboundedSender<Task>),
}

enum TaskReceiver {
    Bounded(mpsc::Receiver<Task>),
    Unbounded(mpsc::UnboundedReceiver<Task>),
}

impl TaskReceiver {
    async fn recv(&mut self) -> Option<Task> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    queued: AtomicUsize,
    active: AtomicUsize,
}

struct Shared {
    name: String,
    halted: AtomicBool,
    counters: Counters,
    live_workers: AtomicUsize,
    terminated: Notify,
    failure_hook: Option<TaskFailureHook>,
}

/// Decrements the live worker count when a worker exits or is aborted.
struct LiveWorker(Arc<Shared>);

impl Drop for LiveWorker {
    fn drop(&mut self) {
        if self.0.live_workers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.terminated.notify_waiters();
        }
    }
}

fn saturating_decrement(counter: &AtomicUsize) {
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
        Some(v.saturating_sub(1))
    });
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A fixed set of Tokio worker tasks draining a FIFO task queue.
///
/// Submission never blocks: a bounded queue that is full rejects the task
/// instead. A pool with one worker runs tasks strictly in submission order;
/// with more workers, tasks may complete out of order.
///
/// The pool is owned by whoever created it. Decorators and pipelines that
/// borrow it never shut it down, except a pipeline halting its own helper.
pub struct WorkerPool {
    shared: Arc<Shared>,
    config: PoolConfig,
    sender: Mutex<Option<TaskSender>>,
    workers: Mutex<JoinSet<()>>,
}

impl WorkerPool {
    /// Starts a pool on the current Tokio runtime.
    pub fn new(config: PoolConfig) -> Result<Arc<Self>, PipelineError> {
        Self::start(config, None)
    }

    /// Starts a pool that calls `hook` whenever a task panics.
    pub fn with_failure_hook(
        config: PoolConfig,
        hook: TaskFailureHook,
    ) -> Result<Arc<Self>, PipelineError> {
        Self::start(config, Some(hook))
    }

    /// Starts a single-worker, unbounded pool.
    pub fn single(name: impl Into<String>) -> Result<Arc<Self>, PipelineError> {
        Self::new(PoolConfig::new(name))
    }

    /// Starts an unbounded pool with `workers` workers.
    pub fn fixed(name: impl Into<String>, workers: usize) -> Result<Arc<Self>, PipelineError> {
        Self::new(PoolConfig::new(name).with_workers(workers))
    }

    fn start(
        config: PoolConfig,
        failure_hook: Option<TaskFailureHook>,
    ) -> Result<Arc<Self>, PipelineError> {
        config.validate()?;
        let handle =
            Handle::try_current().map_err(|_| PipelineError::NoRuntime(config.name.clone()))?;

        let (sender, receiver) = match config.queue_capacity {
            Some(capacity) => {
                let (tx, rx) = mpsc::channel(capacity);
                (TaskSender::Bounded(tx), TaskReceiver::Bounded(rx))
            }
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (TaskSender::Unbounded(tx), TaskReceiver::Unbounded(rx))
            }
        };

        let shared = Arc::new(Shared {
            name: config.name.clone(),
            halted: AtomicBool::new(false),
            counters: Counters::default(),
            live_workers: AtomicUsize::new(config.workers),
            terminated: Notify::new(),
            failure_hook,
        });

        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let mut workers = JoinSet::new();
        for index in 0..config.workers {
            let guard = LiveWorker(shared.clone());
            workers.spawn_on(run_worker(guard, receiver.clone(), index), &handle);
        }

        debug!(
            pool = %config.name,
            workers = config.workers,
            queue_capacity = ?config.queue_capacity,
            "Executor started"
        );

        Ok(Arc::new(Self {
            shared,
            config,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }))
    }

    /// Returns the pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Returns the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Enqueues a task without waiting for it to run.
    pub fn submit<F>(&self, task: F) -> Result<(), PipelineError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_halted() {
            return Err(self.reject(RejectReason::ShutDown));
        }

        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Err(self.reject(RejectReason::ShutDown));
        };

        let task: Task = Box::pin(task);
        self.shared.counters.queued.fetch_add(1, Ordering::AcqRel);
        let sent = match sender {
            TaskSender::Bounded(tx) => tx.try_send(task).map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => RejectReason::QueueFull,
                mpsc::error::TrySendError::Closed(_) => RejectReason::ShutDown,
            }),
            TaskSender::Unbounded(tx) => tx.send(task).map_err(|_| RejectReason::ShutDown),
        };

        match sent {
            Ok(()) => {
                self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(reason) => {
                saturating_decrement(&self.shared.counters.queued);
                Err(self.reject(reason))
            }
        }
    }

    fn reject(&self, reason: RejectReason) -> PipelineError {
        self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
        PipelineError::Rejected {
            pool: self.shared.name.clone(),
            reason,
        }
    }

    /// Stops accepting tasks. Queued tasks still run.
    pub fn shutdown(&self) {
        if self.sender.lock().take().is_some() {
            info!(pool = %self.shared.name, "Executor shutting down");
        }
    }

    /// Stops accepting tasks, drops queued tasks and aborts the workers.
    ///
    /// Returns the number of queued tasks that will never run. A task that is
    /// already running is cancelled at its next await point.
    pub fn shutdown_now(&self) -> usize {
        self.shared.halted.store(true, Ordering::Release);
        self.sender.lock().take();
        self.workers.lock().abort_all();

        let dropped = self.shared.counters.queued.swap(0, Ordering::AcqRel);
        info!(pool = %self.shared.name, dropped, "Executor halted");
        dropped
    }

    /// Waits until every worker has exited. Returns false on timeout.
    ///
    /// Workers exit after `shutdown` once the queue drains, or right away
    /// after `shutdown_now`.
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.shared.terminated.notified();
                if self.shared.live_workers.load(Ordering::Acquire) == 0 {
                    break;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    /// Returns true once the pool no longer accepts tasks.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Returns true if the pool was force-terminated.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.shared.halted.load(Ordering::Acquire)
    }

    /// Returns a snapshot of the task counters.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let counters = &self.shared.counters;
        PoolMetrics {
            submitted: counters.submitted.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            queued: counters.queued.load(Ordering::Acquire),
            active: counters.active.load(Ordering::Acquire),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("shutdown", &self.is_shutdown())
            .field("halted", &self.is_halted())
            .field("metrics", &self.metrics())
            .finish()
    }
}

async fn run_worker(
    guard: LiveWorker,
    receiver: Arc<tokio::sync::Mutex<TaskReceiver>>,
    index: usize,
) {
    let shared = guard.0.clone();
    loop {
        let next = {
            let mut rx = receiver.lock().await;
            rx.recv().await
        };
        let Some(task) = next else {
            break;
        };
        saturating_decrement(&shared.counters.queued);
        if shared.halted.load(Ordering::Acquire) {
            break;
        }

        shared.counters.active.fetch_add(1, Ordering::AcqRel);
        let outcome = AssertUnwindSafe(task).catch_unwind().await;
        saturating_decrement(&shared.counters.active);

        match outcome {
            Ok(()) => {
                shared.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                let failure = TaskFailure {
                    pool: shared.name.clone(),
                    message: panic_message(payload.as_ref()),
                };
                error!(pool = %shared.name, worker = index, "Task panicked: {}", failure.message);
                if let Some(hook) = &shared.failure_hook {
                    hook(&failure);
                }
            }
        }
    }
    debug!(pool = %shared.name, worker = index, "Worker exited");
    drop(guard);
}
