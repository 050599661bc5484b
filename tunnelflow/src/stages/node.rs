//! Chain plumbing shared by every pipeline element.
//!
//! A chain is a singly-linked list of [`Inlet`]s. Each element owns a
//! [`Link`] to its successor that is written exactly once, when the owning
//! pipeline wires the chain.

use super::Stage;
use crate::context::PipelineContext;
use crate::errors::{PipelineError, StageError};
use crate::events::{ErrorReporter, StageFailure};
use async_trait::async_trait;
use std::sync::{Arc, OnceLock};
use tracing::{error, trace};

/// The entry point for driving data into a chain element.
#[async_trait]
pub trait Inlet<T: Send + 'static>: Send + Sync {
    /// Processes one input and forwards any output down the chain.
    ///
    /// Never returns an error: failures are logged and reported by the
    /// element that observed them.
    async fn process(&self, input: T);
}

/// Init and shutdown hooks of a chain element.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Returns the element name.
    fn name(&self) -> &str;

    /// Binds the reporter that receives this element's processing failures.
    ///
    /// Called synchronously while the owning pipeline links the chain, before
    /// any input can arrive. Only the first binding sticks.
    fn bind_reporter(&self, _reporter: &Arc<dyn ErrorReporter>) {}

    /// One-time setup with the shared context.
    async fn init(&self, ctx: Arc<PipelineContext>) -> Result<(), StageError>;

    /// Releases resources acquired in `init`.
    ///
    /// Must be safe to call even if `init` never ran or failed partway.
    async fn shutdown(&self) -> Result<(), StageError>;
}

/// A chain element that accepts `I` and forwards `O`.
///
/// Implemented by leaf stages ([`StageNode`]), the execution decorator and
/// pipelines, so all three compose through the same interface.
pub trait Node<I: Send + 'static, O: Send + 'static>: Inlet<I> + Lifecycle {
    /// Sets the forward link. Called once by the owning pipeline while wiring.
    fn set_next_stage(&self, next: Arc<dyn Inlet<O>>) -> Result<(), PipelineError>;

    /// Returns true if the forward link is already set.
    fn is_linked(&self) -> bool;
}

/// A write-once reference to the next element in a chain.
pub struct Link<T: Send + 'static> {
    owner: String,
    next: OnceLock<Arc<dyn Inlet<T>>>,
}

impl<T: Send + 'static> Link<T> {
    /// Creates an unset link owned by `owner`.
    #[must_use]
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            next: OnceLock::new(),
        }
    }

    /// Sets the successor. Fails if one is already set.
    pub fn set(&self, next: Arc<dyn Inlet<T>>) -> Result<(), PipelineError> {
        self.next
            .set(next)
            .map_err(|_| PipelineError::AlreadyLinked(self.owner.clone()))
    }

    /// Returns true if a successor is set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.next.get().is_some()
    }

    /// Forwards a value to the successor; drops it if the chain ends here.
    pub async fn forward(&self, value: T) {
        match self.next.get() {
            Some(next) => next.process(value).await,
            None => trace!(owner = %self.owner, "End of chain, dropping output"),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Inlet<T> for Link<T> {
    async fn process(&self, input: T) {
        self.forward(input).await;
    }
}

impl<T: Send + 'static> std::fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("owner", &self.owner)
            .field("linked", &self.is_set())
            .finish()
    }
}

/// Adapts a [`Stage`] into a chain [`Node`].
///
/// This is where the default `process` behavior lives: run `do_process`,
/// forward `Some` output, stop on `None`, and log plus report any error.
pub struct StageNode<S: Stage> {
    stage: S,
    next: Link<S::Output>,
    reporter: OnceLock<Arc<dyn ErrorReporter>>,
}

impl<S: Stage> StageNode<S> {
    /// Wraps a stage.
    #[must_use]
    pub fn new(stage: S) -> Self {
        let next = Link::new(stage.name());
        Self {
            stage,
            next,
            reporter: OnceLock::new(),
        }
    }

    /// Returns the wrapped stage.
    #[must_use]
    pub fn stage(&self) -> &S {
        &self.stage
    }

    fn report(&self, err: StageError) {
        let err = err.in_stage(self.stage.name());
        error!(
            stage = %err.stage,
            kind = %err.kind,
            input = ?err.input,
            "Stage failed: {}", err.message
        );
        if let Some(reporter) = self.reporter.get() {
            reporter.report(StageFailure::from(&err));
        }
    }
}

#[async_trait]
impl<S: Stage> Inlet<S::Input> for StageNode<S> {
    async fn process(&self, input: S::Input) {
        match self.stage.do_process(input).await {
            Ok(Some(output)) => self.next.forward(output).await,
            Ok(None) => trace!(stage = %self.stage.name(), "Stage produced no output"),
            Err(err) => self.report(err),
        }
    }
}

#[async_trait]
impl<S: Stage> Lifecycle for StageNode<S> {
    fn name(&self) -> &str {
        self.stage.name()
    }

    fn bind_reporter(&self, reporter: &Arc<dyn ErrorReporter>) {
        let _ = self.reporter.set(reporter.clone());
    }

    async fn init(&self, ctx: Arc<PipelineContext>) -> Result<(), StageError> {
        self.bind_reporter(ctx.error_reporter());
        self.stage
            .init(&ctx)
            .await
            .map_err(|err| err.in_stage(self.stage.name()))
    }

    async fn shutdown(&self) -> Result<(), StageError> {
        self.stage
            .shutdown()
            .await
            .map_err(|err| err.in_stage(self.stage.name()))
    }
}

impl<S: Stage> Node<S::Input, S::Output> for StageNode<S> {
    fn set_next_stage(&self, next: Arc<dyn Inlet<S::Output>>) -> Result<(), PipelineError> {
        self.next.set(next)
    }

    fn is_linked(&self) -> bool {
        self.next.is_set()
    }
}

impl<S: Stage + std::fmt::Debug> std::fmt::Debug for StageNode<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageNode")
            .field("stage", &self.stage)
            .field("next", &self.next)
            .finish()
    }
}
