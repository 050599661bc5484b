//! Shared probes for observing stage lifecycles in tests.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Ordered log of lifecycle calls shared by several stages.
///
/// Entries have the form `"{stage}:{event}"`, e.g. `"apply:shutdown"`.
#[derive(Debug, Clone, Default)]
pub struct LifecycleLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl LifecycleLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn record(&self, stage: &str, event: &str) {
        self.entries.lock().push(format!("{stage}:{event}"));
    }

    /// Returns all entries in order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Returns the entries for one event, in order.
    #[must_use]
    pub fn events(&self, event: &str) -> Vec<String> {
        let suffix = format!(":{event}");
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.ends_with(&suffix))
            .cloned()
            .collect()
    }
}

/// Call counters for one instrumented stage.
#[derive(Debug, Default)]
pub struct StageProbe {
    init_calls: AtomicUsize,
    init_completed: AtomicUsize,
    process_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
}

impl StageProbe {
    /// Creates a zeroed probe.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of times `init` was entered.
    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    /// Number of times `init` returned successfully.
    pub fn init_completed(&self) -> usize {
        self.init_completed.load(Ordering::SeqCst)
    }

    /// Number of inputs processed.
    pub fn process_calls(&self) -> usize {
        self.process_calls.load(Ordering::SeqCst)
    }

    /// Number of times `shutdown` was called.
    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn hit_init(&self) {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn hit_init_completed(&self) {
        self.init_completed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn hit_process(&self) {
        self.process_calls.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn hit_shutdown(&self) {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// A one-shot latch. Waiters block until the gate is opened.
#[derive(Debug, Clone)]
pub struct Gate {
    state: Arc<watch::Sender<bool>>,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    /// Creates a closed gate.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    /// Opens the gate, releasing current and future waiters.
    pub fn open(&self) {
        self.state.send_replace(true);
    }

    /// Returns true once opened.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.state.borrow()
    }

    /// Waits until the gate is opened.
    pub async fn wait(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

/// Polls `check` until it holds or `timeout` elapses.
pub async fn eventually<F>(timeout: Duration, check: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
