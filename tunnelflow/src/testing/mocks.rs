//! Instrumented stages for testing.

use super::{Gate, LifecycleLog, StageProbe};
use crate::context::PipelineContext;
use crate::errors::StageError;
use crate::stages::Stage;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    None,
    Fail,
    Panic,
}

/// An identity stage that counts lifecycle calls and can be told to fail.
pub struct RecordingStage<T> {
    name: String,
    probe: Arc<StageProbe>,
    log: Option<LifecycleLog>,
    init_fault: Fault,
    shutdown_fault: Fault,
    init_gate: Option<Gate>,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> RecordingStage<T> {
    /// Creates a stage that succeeds at everything.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            probe: StageProbe::new(),
            log: None,
            init_fault: Fault::None,
            shutdown_fault: Fault::None,
            init_gate: None,
            _marker: PhantomData,
        }
    }

    /// Makes `init` return an error.
    #[must_use]
    pub fn failing_init(mut self) -> Self {
        self.init_fault = Fault::Fail;
        self
    }

    /// Makes `init` panic.
    #[must_use]
    pub fn panicking_init(mut self) -> Self {
        self.init_fault = Fault::Panic;
        self
    }

    /// Makes `shutdown` return an error.
    #[must_use]
    pub fn failing_shutdown(mut self) -> Self {
        self.shutdown_fault = Fault::Fail;
        self
    }

    /// Makes `shutdown` panic.
    #[must_use]
    pub fn panicking_shutdown(mut self) -> Self {
        self.shutdown_fault = Fault::Panic;
        self
    }

    /// Blocks `init` until `gate` opens.
    #[must_use]
    pub fn blocking_init(mut self, gate: Gate) -> Self {
        self.init_gate = Some(gate);
        self
    }

    /// Records lifecycle calls into a shared log.
    #[must_use]
    pub fn with_log(mut self, log: LifecycleLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Returns the stage's call counters.
    #[must_use]
    pub fn probe(&self) -> Arc<StageProbe> {
        self.probe.clone()
    }

    fn record(&self, event: &str) {
        if let Some(log) = &self.log {
            log.record(&self.name, event);
        }
    }
}

impl<T> std::fmt::Debug for RecordingStage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingStage")
            .field("name", &self.name)
            .field("probe", &self.probe)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T: Send + 'static> Stage for RecordingStage<T> {
    type Input = T;
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, _ctx: &PipelineContext) -> Result<(), StageError> {
        self.probe.hit_init();
        self.record("init");
        if let Some(gate) = &self.init_gate {
            gate.wait().await;
        }
        match self.init_fault {
            Fault::None => {
                self.probe.hit_init_completed();
                Ok(())
            }
            Fault::Fail => Err(StageError::init("connection refused")),
            Fault::Panic => panic!("init exploded"),
        }
    }

    async fn do_process(&self, input: T) -> Result<Option<T>, StageError> {
        self.probe.hit_process();
        Ok(Some(input))
    }

    async fn shutdown(&self) -> Result<(), StageError> {
        self.probe.hit_shutdown();
        self.record("shutdown");
        match self.shutdown_fault {
            Fault::None => Ok(()),
            Fault::Fail => Err(StageError::shutdown("failed to release handle")),
            Fault::Panic => panic!("shutdown exploded"),
        }
    }
}

/// Handle to the values received by a [`CollectingStage`].
#[derive(Debug, Clone)]
pub struct Collected<T> {
    values: Arc<Mutex<Vec<T>>>,
    arrived: Arc<Notify>,
}

impl<T: Clone> Collected<T> {
    fn new() -> Self {
        Self {
            values: Arc::new(Mutex::new(Vec::new())),
            arrived: Arc::new(Notify::new()),
        }
    }

    fn push(&self, value: T) {
        self.values.lock().push(value);
        self.arrived.notify_waiters();
    }

    /// Returns the values received so far, in arrival order.
    #[must_use]
    pub fn values(&self) -> Vec<T> {
        self.values.lock().clone()
    }

    /// Returns the number of values received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    /// Returns true if nothing arrived yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits until at least `count` values arrived or `timeout` elapsed,
    /// then returns whatever was received.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<T> {
        let _ = tokio::time::timeout(timeout, async {
            loop {
                let arrived = self.arrived.notified();
                if self.values.lock().len() >= count {
                    break;
                }
                arrived.await;
            }
        })
        .await;
        self.values()
    }
}

/// A terminal stage that stores every input it receives.
pub struct CollectingStage<T> {
    name: String,
    sink: Collected<T>,
}

impl<T: Clone> CollectingStage<T> {
    /// Creates an empty collector.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sink: Collected::new(),
        }
    }

    /// Returns a handle to the collected values.
    #[must_use]
    pub fn sink(&self) -> Collected<T> {
        self.sink.clone()
    }
}

impl<T> std::fmt::Debug for CollectingStage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectingStage")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> Stage for CollectingStage<T> {
    type Input = T;
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    async fn do_process(&self, input: T) -> Result<Option<T>, StageError> {
        self.sink.push(input);
        Ok(None)
    }
}

/// An identity stage whose `do_process` waits for a gate.
pub struct BlockingStage<T> {
    name: String,
    gate: Gate,
    probe: Arc<StageProbe>,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> BlockingStage<T> {
    /// Creates a stage that blocks every input until `gate` opens.
    #[must_use]
    pub fn new(name: impl Into<String>, gate: Gate) -> Self {
        Self {
            name: name.into(),
            gate,
            probe: StageProbe::new(),
            _marker: PhantomData,
        }
    }

    /// Returns the stage's call counters.
    #[must_use]
    pub fn probe(&self) -> Arc<StageProbe> {
        self.probe.clone()
    }
}

impl<T> std::fmt::Debug for BlockingStage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingStage")
            .field("name", &self.name)
            .field("open", &self.gate.is_open())
            .finish()
    }
}

#[async_trait]
impl<T: Send + 'static> Stage for BlockingStage<T> {
    type Input = T;
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    async fn do_process(&self, input: T) -> Result<Option<T>, StageError> {
        self.probe.hit_process();
        self.gate.wait().await;
        Ok(Some(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StageErrorKind;

    #[tokio::test]
    async fn test_recording_stage_counts_calls() {
        let log = LifecycleLog::new();
        let stage = RecordingStage::<u32>::new("rec").with_log(log.clone());
        let probe = stage.probe();
        let ctx = PipelineContext::new();

        stage.init(&ctx).await.unwrap();
        assert_eq!(stage.do_process(4).await.unwrap(), Some(4));
        stage.shutdown().await.unwrap();

        assert_eq!(probe.init_calls(), 1);
        assert_eq!(probe.init_completed(), 1);
        assert_eq!(probe.process_calls(), 1);
        assert_eq!(probe.shutdown_calls(), 1);
        assert_eq!(log.entries(), vec!["rec:init", "rec:shutdown"]);
    }

    #[tokio::test]
    async fn test_recording_stage_faults() {
        let stage = RecordingStage::<u32>::new("bad")
            .failing_init()
            .failing_shutdown();
        let ctx = PipelineContext::new();

        let err = stage.init(&ctx).await.unwrap_err();
        assert_eq!(err.kind, StageErrorKind::Init);
        let err = stage.shutdown().await.unwrap_err();
        assert_eq!(err.kind, StageErrorKind::Shutdown);
        assert_eq!(stage.probe().init_completed(), 0);
    }

    #[tokio::test]
    async fn test_collecting_stage_terminates_chain() {
        let stage = CollectingStage::new("sink");
        let sink = stage.sink();

        assert_eq!(stage.do_process("a").await.unwrap(), None);
        assert_eq!(stage.do_process("b").await.unwrap(), None);

        assert_eq!(sink.wait_for(2, Duration::from_secs(1)).await, vec!["a", "b"]);
        assert_eq!(sink.len(), 2);
    }
}
