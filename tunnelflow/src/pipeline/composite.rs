//! The composite pipeline stage.

use super::builder::Wiring;
use super::init::{init_stages, InitReport};
use super::PipelineBuilder;
use crate::context::PipelineContext;
use crate::errors::{PipelineError, StageError, StageErrorKind};
use crate::events::ErrorReporter;
use crate::executor::{panic_message, WorkerPool};
use crate::stages::{Inlet, Lifecycle, Link, Node};
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// An ordered chain of stages exposed as a single stage.
///
/// Build one with [`Pipeline::builder`]. The chain is linked by the first
/// [`init`](Self::init), which also dispatches every stage's own `init` onto
/// the pipeline's helper pool and returns without waiting for it. Use
/// [`wait_initialized`](Self::wait_initialized) to await readiness.
///
/// A pipeline implements [`Node`], so it can be nested in another pipeline.
/// Its output then flows on to the stage that follows it in the outer chain.
pub struct Pipeline<I: Send + 'static, O: Send + 'static> {
    name: String,
    stages: Vec<Arc<dyn Lifecycle>>,
    head: Arc<Link<I>>,
    next: Arc<Link<O>>,
    wiring: Mutex<Option<Wiring>>,
    helper: Arc<WorkerPool>,
    owns_helper: bool,
    readiness: OnceLock<watch::Receiver<Option<InitReport>>>,
    accepting: AtomicBool,
    shut_down: AtomicBool,
}

impl<I: Send + 'static> Pipeline<I, I> {
    /// Starts building a pipeline that accepts `I`.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> PipelineBuilder<I, I> {
        PipelineBuilder::new(name)
    }
}

impl<I: Send + 'static, O: Send + 'static> Pipeline<I, O> {
    pub(crate) fn from_parts(
        name: String,
        stages: Vec<Arc<dyn Lifecycle>>,
        head: Arc<Link<I>>,
        next: Arc<Link<O>>,
        wiring: Wiring,
        helper: Arc<WorkerPool>,
        owns_helper: bool,
    ) -> Self {
        Self {
            name,
            stages,
            head,
            next,
            wiring: Mutex::new(Some(wiring)),
            helper,
            owns_helper,
            readiness: OnceLock::new(),
            accepting: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stage names in chain order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the pipeline has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Returns the helper pool used for background initialization.
    #[must_use]
    pub fn helper(&self) -> &Arc<WorkerPool> {
        &self.helper
    }

    /// Links the chain and starts initializing the stages in the background.
    ///
    /// Returns once the initialization task is queued. Calling it again fails
    /// with [`PipelineError::AlreadyInitialized`] and changes nothing. If a
    /// stage already has a successor, fails with
    /// [`PipelineError::AlreadyLinked`] before linking anything.
    pub fn init(&self, ctx: Arc<PipelineContext>) -> Result<(), PipelineError> {
        {
            let mut wiring = self.wiring.lock();
            match wiring.as_ref() {
                Some(pending) => pending.check()?,
                None => return Err(PipelineError::AlreadyInitialized(self.name.clone())),
            }
            if let Some(pending) = wiring.take() {
                pending.link()?;
            }
        }
        for stage in &self.stages {
            stage.bind_reporter(ctx.error_reporter());
        }
        self.accepting.store(true, Ordering::Release);
        debug!(pipeline = %self.name, stages = self.stages.len(), "Chain linked");

        let (ready_tx, ready_rx) = watch::channel(None);
        let _ = self.readiness.set(ready_rx);

        let pipeline = self.name.clone();
        let stages = self.stages.clone();
        self.helper.submit(async move {
            let report = init_stages(pipeline, stages, ctx).await;
            let _ = ready_tx.send(Some(report));
        })
    }

    /// Waits for the background initialization to finish.
    ///
    /// Fails with [`PipelineError::NotInitialized`] if `init` was never
    /// called, or [`PipelineError::InitAborted`] if the helper pool dropped
    /// the task before it completed.
    pub async fn wait_initialized(&self) -> Result<InitReport, PipelineError> {
        let Some(readiness) = self.readiness.get() else {
            return Err(PipelineError::NotInitialized(self.name.clone()));
        };

        let mut readiness = readiness.clone();
        let report = readiness
            .wait_for(Option::is_some)
            .await
            .map(|state| (*state).clone());

        match report {
            Ok(Some(report)) => Ok(report),
            _ => Err(PipelineError::InitAborted(self.name.clone())),
        }
    }

    /// Returns true once the background initialization has finished.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.readiness
            .get()
            .is_some_and(|readiness| readiness.borrow().is_some())
    }

    /// Feeds one input into the first stage.
    ///
    /// Does nothing without stages. Input arriving before `init` linked the
    /// chain, or after shutdown, is dropped with a warning.
    pub async fn process(&self, input: I) {
        if self.stages.is_empty() {
            trace!(pipeline = %self.name, "No stages, ignoring input");
            return;
        }
        if !self.accepting.load(Ordering::Acquire) {
            warn!(pipeline = %self.name, "Pipeline is not accepting input, dropping it");
            return;
        }
        self.head.forward(input).await;
    }

    /// The pipeline's own transformation: none.
    ///
    /// All work happens in the stages; a pipeline never produces output from
    /// this hook.
    #[allow(
        clippy::unused_self,
        clippy::unnecessary_wraps,
        clippy::needless_pass_by_value
    )]
    pub fn do_process(&self, _input: I) -> Result<Option<O>, StageError> {
        Ok(None)
    }

    /// Shuts every stage down without halting the helper pool.
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        self.shutdown_with(false).await
    }

    /// Shuts every stage down in registration order.
    ///
    /// Every stage gets its `shutdown` call even if earlier ones fail or
    /// panic; failures are collected into [`PipelineError::Shutdown`]. With
    /// `halt_helper` the helper pool is halted and a pending initialization
    /// never runs. Otherwise a helper supplied by the caller is left running,
    /// and one created by the builder is drained so queued tasks still finish.
    /// Stages are shut down at most once.
    pub async fn shutdown_with(&self, halt_helper: bool) -> Result<(), PipelineError> {
        self.accepting.store(false, Ordering::Release);

        let mut errors = Vec::new();
        if self.shut_down.swap(true, Ordering::AcqRel) {
            debug!(pipeline = %self.name, "Stages already shut down");
        } else {
            for stage in &self.stages {
                let name = stage.name();
                let err = match AssertUnwindSafe(stage.shutdown()).catch_unwind().await {
                    Ok(Ok(())) => {
                        debug!(pipeline = %self.name, stage = name, "Stage shut down");
                        continue;
                    }
                    Ok(Err(err)) => err.in_stage(name),
                    Err(payload) => {
                        StageError::new(StageErrorKind::Panicked, panic_message(payload.as_ref()))
                            .in_stage(name)
                    }
                };
                warn!(
                    pipeline = %self.name,
                    stage = %err.stage,
                    "Stage failed to shut down: {}", err.message
                );
                errors.push(err);
            }
        }

        if halt_helper {
            let dropped = self.helper.shutdown_now();
            info!(pipeline = %self.name, dropped, "Helper halted");
        } else if self.owns_helper {
            self.helper.shutdown();
        } else {
            debug!(
                pipeline = %self.name,
                helper = %self.helper.name(),
                "Leaving supplied helper running"
            );
        }

        if errors.is_empty() {
            info!(pipeline = %self.name, "Pipeline shut down");
            Ok(())
        } else {
            Err(PipelineError::Shutdown(errors))
        }
    }
}

impl<I: Send + 'static, O: Send + 'static> std::fmt::Debug for Pipeline<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .field("helper", &self.helper.name())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

#[async_trait]
impl<I: Send + 'static, O: Send + 'static> Inlet<I> for Pipeline<I, O> {
    async fn process(&self, input: I) {
        Pipeline::process(self, input).await;
    }
}

#[async_trait]
impl<I: Send + 'static, O: Send + 'static> Lifecycle for Pipeline<I, O> {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind_reporter(&self, reporter: &Arc<dyn ErrorReporter>) {
        for stage in &self.stages {
            stage.bind_reporter(reporter);
        }
    }

    /// Initializes the nested chain and waits for it, so the outer report
    /// reflects nested failures.
    async fn init(&self, ctx: Arc<PipelineContext>) -> Result<(), StageError> {
        Pipeline::init(self, ctx)
            .map_err(|err| StageError::init(err.to_string()).with_source(err))?;

        let report = self
            .wait_initialized()
            .await
            .map_err(|err| StageError::init(err.to_string()).with_source(err))?;

        if report.is_complete() {
            Ok(())
        } else {
            Err(StageError::init(format!(
                "nested stages failed to initialize: {}",
                report.failed_stages().join(", ")
            )))
        }
    }

    async fn shutdown(&self) -> Result<(), StageError> {
        self.shutdown_with(false)
            .await
            .map_err(|err| StageError::shutdown(err.to_string()).with_source(err))
    }
}

impl<I: Send + 'static, O: Send + 'static> Node<I, O> for Pipeline<I, O> {
    fn set_next_stage(&self, next: Arc<dyn Inlet<O>>) -> Result<(), PipelineError> {
        self.next.set(next)
    }

    fn is_linked(&self) -> bool {
        self.next.is_set()
    }
}
