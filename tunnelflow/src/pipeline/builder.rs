//! Typed, append-only pipeline builder.

use super::{Pipeline, PipelineConfig};
use crate::errors::PipelineError;
use crate::executor::{ExecutionDecorator, PoolConfig, WorkerPool};
use crate::stages::{Inlet, Lifecycle, Link, Node, Stage, StageNode};
use std::sync::Arc;

/// A deferred `set_next_stage` call.
type LinkStep = Box<dyn FnOnce() -> Result<(), PipelineError> + Send>;

/// Fails if a chain element already has a successor.
type LinkGuard = Box<dyn Fn() -> Result<(), PipelineError> + Send + Sync>;

/// The links of a chain, applied once when the pipeline initializes.
#[derive(Default)]
pub(crate) struct Wiring {
    guards: Vec<LinkGuard>,
    steps: Vec<LinkStep>,
}

impl Wiring {
    /// Checks that no element of the chain is linked yet.
    pub(crate) fn check(&self) -> Result<(), PipelineError> {
        self.guards.iter().try_for_each(|guard| guard())
    }

    /// Links the chain. Nothing is linked if [`check`](Self::check) fails.
    pub(crate) fn link(self) -> Result<(), PipelineError> {
        self.check()?;
        self.steps.into_iter().try_for_each(|step| step())
    }
}

/// Links the current tail of the chain to whatever is appended next.
type AttachTail<T> = Box<dyn FnOnce(Arc<dyn Inlet<T>>) -> Result<(), PipelineError> + Send>;

/// Builder for [`Pipeline`]s.
///
/// `I` is the pipeline's input type and `C` the output type of the chain so
/// far. Each appended stage must accept `C`, so a mistyped chain does not
/// compile. Stages are only linked when the built pipeline is initialized.
pub struct PipelineBuilder<I: Send + 'static, C: Send + 'static> {
    name: String,
    helper_config: PoolConfig,
    helper: Option<Arc<WorkerPool>>,
    head: Arc<Link<I>>,
    stages: Vec<Arc<dyn Lifecycle>>,
    wiring: Wiring,
    attach_tail: AttachTail<C>,
}

impl<I: Send + 'static> PipelineBuilder<I, I> {
    /// Creates an empty builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let head = Arc::new(Link::new(name.clone()));
        let entry = head.clone();
        Self {
            helper_config: PoolConfig::new(format!("{name}-helper")),
            name,
            helper: None,
            head,
            stages: Vec::new(),
            wiring: Wiring::default(),
            attach_tail: Box::new(move |first| entry.set(first)),
        }
    }

    /// Creates a builder named and configured from `config`.
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.name.clone()).with_helper_config(config.helper_config())
    }
}

impl<I: Send + 'static, C: Send + 'static> PipelineBuilder<I, C> {
    /// Supplies the helper pool used for background initialization.
    ///
    /// The caller keeps managing the pool: only
    /// [`shutdown_with(true)`](Pipeline::shutdown_with) halts it, so it can be
    /// shared by several pipelines.
    #[must_use]
    pub fn with_helper(mut self, helper: Arc<WorkerPool>) -> Self {
        self.helper = Some(helper);
        self
    }

    /// Configures the helper pool created by [`build`](Self::build).
    ///
    /// Ignored when a pool was supplied with [`with_helper`](Self::with_helper).
    #[must_use]
    pub fn with_helper_config(mut self, config: PoolConfig) -> Self {
        self.helper_config = config;
        self
    }

    /// Appends a stage that runs inline on the caller of `process`.
    pub fn stage<S>(self, stage: S) -> PipelineBuilder<I, S::Output>
    where
        S: Stage<Input = C>,
    {
        self.node(StageNode::new(stage))
    }

    /// Appends a stage whose processing runs on `executor`.
    pub fn stage_with_executor<S>(
        self,
        stage: S,
        executor: Arc<WorkerPool>,
    ) -> PipelineBuilder<I, S::Output>
    where
        S: Stage<Input = C>,
    {
        self.node(ExecutionDecorator::<C, S::Output>::new(
            StageNode::new(stage),
            executor,
        ))
    }

    /// Appends a nested pipeline. It behaves as a single stage.
    pub fn pipeline<O>(self, inner: Pipeline<C, O>) -> PipelineBuilder<I, O>
    where
        O: Send + 'static,
    {
        self.node(inner)
    }

    /// Appends any chain element.
    pub fn node<N, O>(self, node: N) -> PipelineBuilder<I, O>
    where
        N: Node<C, O> + 'static,
        O: Send + 'static,
    {
        self.push(Arc::new(node))
    }

    /// Appends any chain element, running its processing on `executor`.
    pub fn node_with_executor<N, O>(
        self,
        node: N,
        executor: Arc<WorkerPool>,
    ) -> PipelineBuilder<I, O>
    where
        N: Node<C, O> + 'static,
        O: Send + 'static,
    {
        self.node(ExecutionDecorator::<C, O>::new(node, executor))
    }

    fn push<N, O>(self, node: Arc<N>) -> PipelineBuilder<I, O>
    where
        N: Node<C, O> + 'static,
        O: Send + 'static,
    {
        let Self {
            name,
            helper_config,
            helper,
            head,
            mut stages,
            mut wiring,
            attach_tail,
        } = self;

        let inlet: Arc<dyn Inlet<C>> = node.clone();
        wiring.steps.push(Box::new(move || attach_tail(inlet)));
        let guarded = node.clone();
        wiring.guards.push(Box::new(move || {
            if guarded.is_linked() {
                Err(PipelineError::AlreadyLinked(guarded.name().to_string()))
            } else {
                Ok(())
            }
        }));
        stages.push(node.clone());

        PipelineBuilder {
            name,
            helper_config,
            helper,
            head,
            stages,
            wiring,
            attach_tail: Box::new(move |next| node.set_next_stage(next)),
        }
    }

    /// Returns the number of stages appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if no stage was appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Seals the stage list.
    ///
    /// Creates the helper pool unless one was supplied, so this must run
    /// inside a Tokio runtime in that case. A helper created here belongs to
    /// the pipeline and is drained by its shutdown.
    pub fn build(self) -> Result<Pipeline<I, C>, PipelineError> {
        let (helper, owns_helper) = match self.helper {
            Some(helper) => (helper, false),
            None => (WorkerPool::new(self.helper_config)?, true),
        };

        let next = Arc::new(Link::new(self.name.clone()));
        let mut wiring = self.wiring;
        if !self.stages.is_empty() {
            let exit: Arc<dyn Inlet<C>> = next.clone();
            let attach_tail = self.attach_tail;
            wiring.steps.push(Box::new(move || attach_tail(exit)));
        }

        Ok(Pipeline::from_parts(
            self.name,
            self.stages,
            self.head,
            next,
            wiring,
            helper,
            owns_helper,
        ))
    }
}

impl<I: Send + 'static, C: Send + 'static> std::fmt::Debug for PipelineBuilder<I, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.name)
            .field(
                "stages",
                &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}
