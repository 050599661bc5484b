//! Stage trait and implementations.
//!
//! Stages are the fundamental units of work in a tunnelflow pipeline. A
//! [`Stage`] holds only business logic; [`StageNode`] supplies the chain
//! traversal around it.

mod node;

pub use node::{Inlet, Lifecycle, Link, Node, StageNode};

use crate::context::PipelineContext;
use crate::errors::StageError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;

/// Trait for pipeline stages.
///
/// `do_process` returns `Ok(Some(output))` to forward a value to the next
/// stage, `Ok(None)` to end the chain for this input, or a [`StageError`]
/// when the input cannot be processed. Errors are logged and reported; the
/// chain does not retry.
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    /// The type this stage consumes.
    type Input: Send + 'static;
    /// The type this stage produces.
    type Output: Send + 'static;

    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// One-time setup. May acquire external resources.
    async fn init(&self, _ctx: &PipelineContext) -> Result<(), StageError> {
        Ok(())
    }

    /// Transforms one input.
    async fn do_process(&self, input: Self::Input) -> Result<Option<Self::Output>, StageError>;

    /// Releases resources acquired in `init`.
    ///
    /// Must be a no-op when `init` never ran.
    async fn shutdown(&self) -> Result<(), StageError> {
        Ok(())
    }
}

type MapFn<I, O> = Box<dyn Fn(I) -> Result<Option<O>, StageError> + Send + Sync>;

/// A simple function-based stage.
pub struct FnStage<I, O, F> {
    name: String,
    func: F,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O, F> FnStage<I, O, F>
where
    F: Fn(I) -> Result<Option<O>, StageError> + Send + Sync + 'static,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _marker: PhantomData,
        }
    }
}

impl<I, O> FnStage<I, O, MapFn<I, O>>
where
    I: 'static,
    O: 'static,
{
    /// Creates a stage from an infallible mapping that always forwards.
    pub fn map<G>(name: impl Into<String>, func: G) -> Self
    where
        G: Fn(I) -> O + Send + Sync + 'static,
    {
        Self::new(name, Box::new(move |input| Ok(Some(func(input)))))
    }
}

impl<I, O, F> Debug for FnStage<I, O, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<I, O, F> Stage for FnStage<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Result<Option<O>, StageError> + Send + Sync + 'static,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> &str {
        &self.name
    }

    async fn do_process(&self, input: I) -> Result<Option<O>, StageError> {
        (self.func)(input)
    }
}

/// An async function-based stage.
pub struct AsyncFnStage<I, O, F, Fut> {
    name: String,
    func: F,
    _marker: PhantomData<fn(I) -> (O, Fut)>,
}

impl<I, O, F, Fut> AsyncFnStage<I, O, F, Fut>
where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<O>, StageError>> + Send + 'static,
{
    /// Creates a new async function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _marker: PhantomData,
        }
    }
}

impl<I, O, F, Fut> Debug for AsyncFnStage<I, O, F, Fut> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnStage")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<I, O, F, Fut> Stage for AsyncFnStage<I, O, F, Fut>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<O>, StageError>> + Send + 'static,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> &str {
        &self.name
    }

    async fn do_process(&self, input: I) -> Result<Option<O>, StageError> {
        (self.func)(input).await
    }
}

/// A stage that forwards its input unchanged.
pub struct NoOpStage<T> {
    name: String,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> NoOpStage<T> {
    /// Creates a new no-op stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }
}

impl<T> Debug for NoOpStage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoOpStage")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<T: Send + 'static> Stage for NoOpStage<T> {
    type Input = T;
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    async fn do_process(&self, input: T) -> Result<Option<T>, StageError> {
        Ok(Some(input))
    }
}
